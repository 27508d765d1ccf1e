use serde_json::json;

use crate::config::Settings;
use crate::outputs::{Binding, StackId, ValueKind};
use crate::stack::{self, Error, Stack};

pub const STACK: StackId = StackId {
    id: "Networking",
    state_name: "networking",
};

pub const VPC_MODULE_SOURCE: &str = "terraform-aws-modules/vpc/aws";
pub const VPC_MODULE_VERSION: &str = "~> 5.0";

#[derive(Debug, Clone, PartialEq)]
pub struct NetworkingOutputs {
    pub vpc_id: Binding,
    pub public_subnet_ids: Binding,
    pub private_subnet_ids: Binding,
}

/// Declares the VPC with one public and one private subnet per availability
/// zone. Egress from the private subnets goes through a single NAT gateway,
/// so losing its zone cuts egress for every zone.
pub fn build(settings: &Settings) -> Result<(Stack, NetworkingOutputs), Error> {
    let mut stack = Stack::new(STACK, settings);
    let sizing = &settings.sizing;
    let prefix = settings.name_prefix();

    let zones = stack.data_source(
        "aws_availability_zones",
        "availability_zones",
        json!({ "state": "available" }),
    )?;

    let public_subnet_names: Vec<String> = (1..=sizing.public_subnets.len())
        .map(|index| format!("{}-public-subnet-{}", prefix, index))
        .collect();
    let private_subnet_names: Vec<String> = (1..=sizing.private_subnets.len())
        .map(|index| format!("{}-private-subnet-{}", prefix, index))
        .collect();

    let vpc = stack.module(
        "vpc",
        json!({
            "source": VPC_MODULE_SOURCE,
            "version": VPC_MODULE_VERSION,
            "name": format!("{}-vpc", prefix),
            "cidr": sizing.vpc_cidr,
            "azs": format!(
                "${{slice({}, 0, {})}}",
                zones.path("names"),
                sizing.public_subnets.len()
            ),
            "public_subnet_names": public_subnet_names,
            "public_subnets": sizing.public_subnets,
            "private_subnet_names": private_subnet_names,
            "private_subnets": sizing.private_subnets,
            "enable_dns_hostnames": true,
            "enable_dns_support": true,
            "enable_nat_gateway": true,
            "single_nat_gateway": true,
            "tags": stack::tags(settings),
        }),
    )?;

    let outputs = NetworkingOutputs {
        vpc_id: stack.export("vpc_id", ValueKind::Identifier, vpc.attr("vpc_id"))?,
        public_subnet_ids: stack.export(
            "public_subnet_ids",
            ValueKind::IdentifierList,
            vpc.attr("public_subnets"),
        )?,
        private_subnet_ids: stack.export(
            "private_subnet_ids",
            ValueKind::IdentifierList,
            vpc.attr("private_subnets"),
        )?,
    };

    return Ok((stack, outputs));
}
