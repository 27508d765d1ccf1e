use serde::Serialize;
use serde_json::{json, Value};

use crate::config::{CertificateValidation, Settings};
use crate::outputs::{Binding, StackId, ValueKind};
use crate::stack::{self, Error, Reference, SecurityGroupRule, Stack};
use crate::stacks::networking::NetworkingOutputs;

pub const STACK: StackId = StackId {
    id: "CommonResource",
    state_name: "common-resource",
};

pub const PRODUCTION: &str = "production";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CapacityProviderStrategy {
    pub capacity_provider: &'static str,
    pub weight: u32,
    pub base: u32,
}

pub const FARGATE: CapacityProviderStrategy = CapacityProviderStrategy {
    capacity_provider: "FARGATE",
    weight: 1,
    base: 1,
};

pub const FARGATE_SPOT: CapacityProviderStrategy = CapacityProviderStrategy {
    capacity_provider: "FARGATE_SPOT",
    weight: 1,
    base: 1,
};

/// On-demand capacity for `production`, spot capacity for every other environment.
/// The comparison is exact: `Production` runs on spot.
pub fn capacity_provider_strategy(environment_name: &str) -> CapacityProviderStrategy {
    if environment_name == PRODUCTION {
        FARGATE
    } else {
        FARGATE_SPOT
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SharedOutputs {
    pub ecs_cluster_name: Binding,
    pub load_balancer_arn: Binding,
    pub load_balancer_dns_name: Binding,
    pub load_balancer_zone_id: Binding,
    pub load_balancer_security_group_id: Binding,
    pub load_balancer_listener_https_arn: Binding,
}

/// Declares the wildcard certificate, the ECS cluster and the public load
/// balancer every application stack attaches to.
pub fn build(
    settings: &Settings,
    networking: &NetworkingOutputs,
) -> Result<(Stack, SharedOutputs), Error> {
    let mut stack = Stack::new(STACK, settings);
    let prefix = settings.name_prefix();
    let vpc_id = stack.import(&networking.vpc_id);
    let public_subnet_ids = stack.import(&networking.public_subnet_ids);

    let zone = stack.data_source(
        "aws_route53_zone",
        "route53_zone",
        json!({
            "name": settings.app.hosted_zone_name,
            "private_zone": false,
        }),
    )?;

    let certificate = stack.resource(
        "aws_acm_certificate",
        "acm_certificate",
        json!({
            "domain_name": format!("*.{}", settings.app.hosted_zone_name),
            "validation_method": "DNS",
            "lifecycle": { "create_before_destroy": true },
            "tags": stack::tags(settings),
        }),
    )?;
    let validated_certificate_arn = declare_certificate_validation(
        &mut stack,
        settings,
        &zone,
        &certificate,
    )?;

    let cluster = stack.resource(
        "aws_ecs_cluster",
        "ecs_cluster",
        json!({
            "name": format!("{}-ecs-cluster", prefix),
            "tags": stack::tags(settings),
        }),
    )?;
    stack.resource(
        "aws_ecs_cluster_capacity_providers",
        "ecs_cluster_capacity_providers",
        json!({
            "cluster_name": cluster.attr("name"),
            "capacity_providers": [FARGATE.capacity_provider, FARGATE_SPOT.capacity_provider],
            "default_capacity_provider_strategy": [
                capacity_provider_strategy(&settings.environment_name)
            ],
        }),
    )?;

    let security_group = stack.resource(
        "aws_security_group",
        "lb_security_group",
        json!({
            "name": format!("{}-lb-security-group", prefix),
            "description": "Security group for Load Balancer",
            "vpc_id": vpc_id,
            "ingress": stack::security_group_rules(&[
                SecurityGroupRule::tcp_from_anywhere(80),
                SecurityGroupRule::tcp_from_anywhere(443),
            ]),
            "egress": stack::security_group_rules(&[SecurityGroupRule::all_traffic()]),
            "tags": stack::tags(settings),
        }),
    )?;

    let load_balancer = stack.resource(
        "aws_lb",
        "load_balancer",
        json!({
            "name": format!("{}-lb", prefix),
            "internal": false,
            "load_balancer_type": "application",
            "security_groups": [security_group.attr("id")],
            "subnets": public_subnet_ids,
            "enable_deletion_protection": false,
            "idle_timeout": settings.sizing.lb_idle_timeout,
            "tags": stack::tags(settings),
        }),
    )?;

    stack.resource(
        "aws_lb_listener",
        "load_balancer_listener",
        json!({
            "load_balancer_arn": load_balancer.attr("arn"),
            "port": 80,
            "protocol": "HTTP",
            "default_action": [{
                "type": "redirect",
                "redirect": {
                    "host": "#{host}",
                    "path": "/#{path}",
                    "port": "443",
                    "protocol": "HTTPS",
                    "query": "#{query}",
                    "status_code": "HTTP_301",
                }
            }],
        }),
    )?;

    let https_listener = stack.resource(
        "aws_lb_listener",
        "load_balancer_listener_https",
        json!({
            "load_balancer_arn": load_balancer.attr("arn"),
            "port": 443,
            "protocol": "HTTPS",
            "certificate_arn": validated_certificate_arn,
            "default_action": [{
                "type": "fixed-response",
                "fixed_response": {
                    "content_type": "text/plain",
                    "message_body": "Page is not found",
                    "status_code": "404",
                }
            }],
        }),
    )?;

    let outputs = SharedOutputs {
        ecs_cluster_name: stack.export(
            "ecs_cluster_name",
            ValueKind::Identifier,
            cluster.attr("name"),
        )?,
        load_balancer_arn: stack.export(
            "load_balancer_arn",
            ValueKind::Identifier,
            load_balancer.attr("arn"),
        )?,
        load_balancer_dns_name: stack.export(
            "load_balancer_dns_name",
            ValueKind::Identifier,
            load_balancer.attr("dns_name"),
        )?,
        load_balancer_zone_id: stack.export(
            "load_balancer_zone_id",
            ValueKind::Identifier,
            load_balancer.attr("zone_id"),
        )?,
        load_balancer_security_group_id: stack.export(
            "load_balancer_security_group_id",
            ValueKind::Identifier,
            security_group.attr("id"),
        )?,
        load_balancer_listener_https_arn: stack.export(
            "load_balancer_listener_https_arn",
            ValueKind::Identifier,
            https_listener.attr("arn"),
        )?,
    };

    return Ok((stack, outputs));
}

/// Declares the DNS records proving ownership of the certificate's names and
/// waits for issuance. Returns the ARN of the validated certificate.
fn declare_certificate_validation(
    stack: &mut Stack,
    settings: &Settings,
    zone: &Reference,
    certificate: &Reference,
) -> Result<String, Error> {
    let options = certificate.path("domain_validation_options");

    let (record_body, fqdns): (Value, Value) = match settings.sizing.certificate_validation {
        CertificateValidation::AllOptions => (
            json!({
                "for_each": format!(
                    "${{{{ for dvo in {} : dvo.domain_name => {{ name = dvo.resource_record_name, record = dvo.resource_record_value, type = dvo.resource_record_type }} }}}}",
                    options
                ),
                "zone_id": zone.attr("zone_id"),
                "name": "${each.value.name}",
                "records": ["${each.value.record}"],
                "type": "${each.value.type}",
                "ttl": settings.sizing.validation_record_ttl,
                "allow_overwrite": true,
            }),
            json!("${[for record in aws_route53_record.acm_validation_record : record.fqdn]}"),
        ),
        CertificateValidation::FirstOption => (
            json!({
                "zone_id": zone.attr("zone_id"),
                "name": format!("${{tolist({})[0].resource_record_name}}", options),
                "records": [format!("${{tolist({})[0].resource_record_value}}", options)],
                "type": format!("${{tolist({})[0].resource_record_type}}", options),
                "ttl": settings.sizing.validation_record_ttl,
                "allow_overwrite": true,
            }),
            json!(["${aws_route53_record.acm_validation_record.fqdn}"]),
        ),
    };

    stack.resource("aws_route53_record", "acm_validation_record", record_body)?;
    let validation = stack.resource(
        "aws_acm_certificate_validation",
        "acm_certificate_validation",
        json!({
            "certificate_arn": certificate.attr("arn"),
            "validation_record_fqdns": fqdns,
        }),
    )?;

    return Ok(validation.attr("certificate_arn"));
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::build;
    use super::capacity_provider_strategy;
    use super::{FARGATE, FARGATE_SPOT};
    use crate::config::tests::settings;
    use crate::config::CertificateValidation;
    use crate::stacks::networking;

    #[test]
    fn production_runs_on_demand_capacity() {
        assert_eq!(FARGATE, capacity_provider_strategy("production"));
        assert_eq!("FARGATE", FARGATE.capacity_provider);
        assert_eq!(1, FARGATE.weight);
        assert_eq!(1, FARGATE.base);
    }

    #[test]
    fn every_other_environment_runs_on_spot() {
        for environment in ["staging", "development", "Production", "production ", ""] {
            assert_eq!(FARGATE_SPOT, capacity_provider_strategy(environment));
        }
    }

    #[test]
    fn staging_cluster_selects_spot_exclusively() {
        let settings = settings("acme", "staging");
        let (_, networking) = networking::build(&settings).unwrap();
        let (stack, _) = build(&settings, &networking).unwrap();

        let providers = stack
            .resource_body("aws_ecs_cluster_capacity_providers", "ecs_cluster_capacity_providers")
            .unwrap();
        assert_eq!(
            json!([{ "capacity_provider": "FARGATE_SPOT", "weight": 1, "base": 1 }]),
            providers["default_capacity_provider_strategy"]
        );
        assert_eq!(
            "${aws_ecs_cluster.ecs_cluster.name}",
            providers["cluster_name"]
        );
    }

    #[test]
    fn http_listener_redirects_permanently_to_https() {
        let settings = settings("acme", "production");
        let (_, networking) = networking::build(&settings).unwrap();
        let (stack, _) = build(&settings, &networking).unwrap();

        let listener = stack
            .resource_body("aws_lb_listener", "load_balancer_listener")
            .unwrap();
        let redirect = &listener["default_action"][0]["redirect"];
        assert_eq!(80, listener["port"]);
        assert_eq!("443", redirect["port"]);
        assert_eq!("HTTPS", redirect["protocol"]);
        assert_eq!("HTTP_301", redirect["status_code"]);
        assert_eq!("#{host}", redirect["host"]);
        assert_eq!("/#{path}", redirect["path"]);
        assert_eq!("#{query}", redirect["query"]);
    }

    #[test]
    fn https_listener_terminates_tls_and_defaults_to_not_found() {
        let settings = settings("acme", "production");
        let (_, networking) = networking::build(&settings).unwrap();
        let (stack, outputs) = build(&settings, &networking).unwrap();

        let listener = stack
            .resource_body("aws_lb_listener", "load_balancer_listener_https")
            .unwrap();
        assert_eq!(443, listener["port"]);
        assert_eq!(
            "${aws_acm_certificate_validation.acm_certificate_validation.certificate_arn}",
            listener["certificate_arn"]
        );
        assert_eq!("404", listener["default_action"][0]["fixed_response"]["status_code"]);
        assert_eq!(
            "${aws_lb_listener.load_balancer_listener_https.arn}",
            outputs.load_balancer_listener_https_arn.expression
        );
    }

    #[test]
    fn wires_networking_outputs_through_remote_state() {
        let settings = settings("acme", "production");
        let (_, networking) = networking::build(&settings).unwrap();
        let (stack, _) = build(&settings, &networking).unwrap();

        let load_balancer = stack.resource_body("aws_lb", "load_balancer").unwrap();
        assert_eq!(
            "${data.terraform_remote_state.networking.outputs.public_subnet_ids}",
            load_balancer["subnets"]
        );
        assert_eq!(vec![networking::STACK], stack.dependencies());
    }

    #[test]
    fn validates_every_domain_validation_option() {
        let settings = settings("acme", "production");
        let (_, networking) = networking::build(&settings).unwrap();
        let (stack, _) = build(&settings, &networking).unwrap();

        let certificate = stack
            .resource_body("aws_acm_certificate", "acm_certificate")
            .unwrap();
        assert_eq!("*.acme.com", certificate["domain_name"]);

        let record = stack
            .resource_body("aws_route53_record", "acm_validation_record")
            .unwrap();
        assert_eq!(
            "${{ for dvo in aws_acm_certificate.acm_certificate.domain_validation_options : dvo.domain_name => { name = dvo.resource_record_name, record = dvo.resource_record_value, type = dvo.resource_record_type } }}",
            record["for_each"]
        );
        assert_eq!("${each.value.name}", record["name"]);
        assert_eq!("${data.aws_route53_zone.route53_zone.zone_id}", record["zone_id"]);
    }

    #[test]
    fn first_option_validation_uses_index_zero() {
        let mut settings = settings("acme", "production");
        settings.sizing.certificate_validation = CertificateValidation::FirstOption;
        let (_, networking) = networking::build(&settings).unwrap();
        let (stack, _) = build(&settings, &networking).unwrap();

        let record = stack
            .resource_body("aws_route53_record", "acm_validation_record")
            .unwrap();
        assert_eq!(None, record.get("for_each"));
        assert_eq!(
            "${tolist(aws_acm_certificate.acm_certificate.domain_validation_options)[0].resource_record_name}",
            record["name"]
        );
        assert_eq!(60, record["ttl"]);
    }

    #[test]
    fn load_balancer_security_group_rules_declare_every_attribute() {
        let settings = settings("acme", "production");
        let (_, networking) = networking::build(&settings).unwrap();
        let (stack, _) = build(&settings, &networking).unwrap();

        let security_group = stack
            .resource_body("aws_security_group", "lb_security_group")
            .unwrap();
        let ingress = security_group["ingress"].as_array().unwrap();
        assert_eq!(2, ingress.len());
        assert_eq!(80, ingress[0]["from_port"]);
        assert_eq!(443, ingress[1]["from_port"]);

        for rule in ingress.iter().chain(security_group["egress"].as_array().unwrap()) {
            for key in [
                "cidr_blocks",
                "description",
                "ipv6_cidr_blocks",
                "prefix_list_ids",
                "security_groups",
                "self",
            ] {
                assert_eq!(true, rule.get(key).is_some(), "rule is missing {}", key);
            }
            assert_eq!(json!(["0.0.0.0/0"]), rule["cidr_blocks"]);
            assert_eq!(false, rule["self"]);
        }
    }

    #[test]
    fn exposes_non_empty_outputs() {
        let settings = settings("acme", "production");
        let (_, networking) = networking::build(&settings).unwrap();
        let (stack, outputs) = build(&settings, &networking).unwrap();

        assert_eq!(6, stack.exports().count());
        for binding in stack.exports() {
            assert_eq!(false, binding.expression.is_empty());
        }
        assert_eq!("${aws_ecs_cluster.ecs_cluster.name}", outputs.ecs_cluster_name.expression);
    }
}
