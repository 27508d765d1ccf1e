use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

use crate::config::Settings;
use crate::outputs::{Binding, StackId, ValueKind};

pub const AWS_PROVIDER_SOURCE: &str = "hashicorp/aws";
pub const AWS_PROVIDER_VERSION: &str = "~> 5.0";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Invalid block name `{0}`")]
    InvalidName(String),

    #[error("{kind} `{name}` is declared twice in stack {stack}")]
    DuplicateResource {
        stack: String,
        kind: String,
        name: String,
    },
}

/// Address of a declared resource, data source or module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    address: String,
}

impl Reference {
    /// `${<address>.<attribute>}`
    pub fn attr(&self, attribute: &str) -> String {
        format!("${{{}}}", self.path(attribute))
    }

    /// `<address>.<attribute>`, for use inside a larger expression.
    pub fn path(&self, attribute: &str) -> String {
        format!("{}.{}", self.address, attribute)
    }

    #[cfg(test)]
    pub fn address(&self) -> &str {
        &self.address
    }
}

/// S3 state location shared by every stack of one environment.
#[derive(Debug, Clone, PartialEq)]
struct StateStore {
    bucket: String,
    lock_table: String,
    region: String,
    environment_name: String,
}

/// One Terraform JSON document: backend, provider, resources, data sources,
/// modules, outputs and the remote states it reads.
#[derive(Debug, Clone, PartialEq)]
pub struct Stack {
    id: StackId,
    store: StateStore,
    resources: BTreeMap<String, BTreeMap<String, Value>>,
    data: BTreeMap<String, BTreeMap<String, Value>>,
    modules: BTreeMap<String, Value>,
    exports: BTreeMap<String, Binding>,
    imports: BTreeMap<StackId, Vec<String>>,
}

impl Stack {
    pub fn new(id: StackId, settings: &Settings) -> Self {
        let store = StateStore {
            bucket: settings.backend.bucket.clone(),
            lock_table: settings.backend.lock_table.clone(),
            region: settings.region.clone(),
            environment_name: settings.environment_name.clone(),
        };

        return Self {
            id,
            store,
            resources: BTreeMap::new(),
            data: BTreeMap::new(),
            modules: BTreeMap::new(),
            exports: BTreeMap::new(),
            imports: BTreeMap::new(),
        };
    }

    pub fn id(&self) -> StackId {
        self.id
    }

    pub fn state_key(&self) -> String {
        self.id.state_key(&self.store.environment_name)
    }

    pub fn resource(&mut self, kind: &str, name: &str, body: Value) -> Result<Reference, Error> {
        validate_name(kind)?;
        validate_name(name)?;

        let blocks = self.resources.entry(kind.to_string()).or_default();
        if blocks.contains_key(name) {
            return Err(self.duplicate(kind, name));
        }
        blocks.insert(name.to_string(), body);
        debug!(stack = self.id.id, kind, name, "Declared resource");

        return Ok(Reference {
            address: format!("{}.{}", kind, name),
        });
    }

    pub fn data_source(&mut self, kind: &str, name: &str, body: Value) -> Result<Reference, Error> {
        validate_name(kind)?;
        validate_name(name)?;

        let blocks = self.data.entry(kind.to_string()).or_default();
        if blocks.contains_key(name) {
            return Err(self.duplicate(&format!("data.{}", kind), name));
        }
        blocks.insert(name.to_string(), body);
        debug!(stack = self.id.id, kind, name, "Declared data source");

        return Ok(Reference {
            address: format!("data.{}.{}", kind, name),
        });
    }

    pub fn module(&mut self, name: &str, body: Value) -> Result<Reference, Error> {
        validate_name(name)?;

        if self.modules.contains_key(name) {
            return Err(self.duplicate("module", name));
        }
        self.modules.insert(name.to_string(), body);
        debug!(stack = self.id.id, name, "Declared module");

        return Ok(Reference {
            address: format!("module.{}", name),
        });
    }

    /// Declares a Terraform output and returns the binding consumers import.
    pub fn export(&mut self, name: &str, kind: ValueKind, expression: String) -> Result<Binding, Error> {
        validate_name(name)?;

        if self.exports.contains_key(name) {
            return Err(self.duplicate("output", name));
        }

        let binding = Binding {
            producer: self.id,
            name: name.to_string(),
            kind,
            expression,
        };
        self.exports.insert(name.to_string(), binding.clone());

        return Ok(binding);
    }

    /// Returns the expression this stack uses to read `binding`. Bindings from
    /// another stack are read through that stack's remote state.
    pub fn import(&mut self, binding: &Binding) -> String {
        if binding.producer == self.id {
            return binding.expression.clone();
        }

        let names = self.imports.entry(binding.producer).or_default();
        if !names.contains(&binding.name) {
            names.push(binding.name.clone());
            debug!(
                stack = self.id.id,
                producer = binding.producer.id,
                binding = %binding.name,
                "Imported binding"
            );
        }

        return binding.remote_expression();
    }

    /// Producers this stack reads from, in id order.
    pub fn dependencies(&self) -> Vec<StackId> {
        self.imports.keys().copied().collect()
    }

    /// Binding names imported from `producer`.
    pub fn imported_from(&self, producer: &StackId) -> &[String] {
        match self.imports.get(producer) {
            Some(names) => names.as_slice(),
            None => &[],
        }
    }

    pub fn exports(&self) -> impl Iterator<Item = &Binding> {
        self.exports.values()
    }

    #[cfg(test)]
    pub fn resource_body(&self, kind: &str, name: &str) -> Option<&Value> {
        self.resources.get(kind).and_then(|blocks| blocks.get(name))
    }

    #[cfg(test)]
    pub fn module_body(&self, name: &str) -> Option<&Value> {
        self.modules.get(name)
    }

    pub fn to_json(&self) -> Value {
        let mut document = Map::new();

        document.insert(
            String::from("terraform"),
            json!({
                "backend": {
                    "s3": {
                        "bucket": self.store.bucket,
                        "key": self.state_key(),
                        "region": self.store.region,
                        "encrypt": true,
                        "dynamodb_table": self.store.lock_table,
                    }
                },
                "required_providers": {
                    "aws": {
                        "source": AWS_PROVIDER_SOURCE,
                        "version": AWS_PROVIDER_VERSION,
                    }
                }
            }),
        );
        document.insert(
            String::from("provider"),
            json!({ "aws": [{ "region": self.store.region }] }),
        );

        if !self.resources.is_empty() {
            document.insert(String::from("resource"), json!(self.resources));
        }

        let mut data = self.data.clone();
        for producer in self.imports.keys() {
            data.entry(String::from("terraform_remote_state"))
                .or_default()
                .insert(
                    producer.remote_state_name(),
                    json!({
                        "backend": "s3",
                        "config": {
                            "bucket": self.store.bucket,
                            "key": producer.state_key(&self.store.environment_name),
                            "region": self.store.region,
                        }
                    }),
                );
        }
        if !data.is_empty() {
            document.insert(String::from("data"), json!(data));
        }

        if !self.modules.is_empty() {
            document.insert(String::from("module"), json!(self.modules));
        }

        if !self.exports.is_empty() {
            let outputs: Map<String, Value> = self
                .exports
                .values()
                .map(|binding| (binding.name.clone(), json!({ "value": binding.expression })))
                .collect();
            document.insert(String::from("output"), Value::Object(outputs));
        }

        return Value::Object(document);
    }

    fn duplicate(&self, kind: &str, name: &str) -> Error {
        Error::DuplicateResource {
            stack: self.id.id.to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }
}

/// Standard tags carried by every taggable resource.
pub fn tags(settings: &Settings) -> Value {
    json!({
        "Environment": settings.environment_name,
        "Project": settings.project_name,
    })
}

/// One inline `ingress` or `egress` entry of an `aws_security_group`. Terraform
/// reads these lists as attributes in JSON, so every rule carries every key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SecurityGroupRule {
    pub from_port: u16,
    pub to_port: u16,
    pub protocol: &'static str,
    pub cidr_blocks: Vec<String>,
    pub security_groups: Vec<String>,
    pub description: String,
}

impl SecurityGroupRule {
    /// TCP on a single port from anywhere.
    pub fn tcp_from_anywhere(port: u16) -> Self {
        Self {
            from_port: port,
            to_port: port,
            protocol: "tcp",
            cidr_blocks: vec![String::from("0.0.0.0/0")],
            ..Self::default()
        }
    }

    /// Every protocol and port to anywhere.
    pub fn all_traffic() -> Self {
        Self {
            protocol: "-1",
            cidr_blocks: vec![String::from("0.0.0.0/0")],
            ..Self::default()
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "from_port": self.from_port,
            "to_port": self.to_port,
            "protocol": self.protocol,
            "cidr_blocks": self.cidr_blocks,
            "ipv6_cidr_blocks": [],
            "prefix_list_ids": [],
            "security_groups": self.security_groups,
            "self": false,
            "description": self.description,
        })
    }
}

/// JSON list for a security group's `ingress` or `egress` attribute.
pub fn security_group_rules(rules: &[SecurityGroupRule]) -> Value {
    Value::Array(rules.iter().map(SecurityGroupRule::to_json).collect())
}

fn validate_name(name: &str) -> Result<(), Error> {
    let mut chars = name.chars();
    let valid_start = match chars.next() {
        Some(first) => first.is_ascii_alphabetic() || first == '_',
        None => false,
    };
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(Error::InvalidName(name.to_string()));
    }

    return Ok(());
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::Error;
    use super::Stack;
    use super::{security_group_rules, SecurityGroupRule};
    use crate::config::tests::settings;
    use crate::outputs::{StackId, ValueKind};

    const PRODUCER: StackId = StackId {
        id: "Networking",
        state_name: "networking",
    };
    const CONSUMER: StackId = StackId {
        id: "CommonResource",
        state_name: "common-resource",
    };

    #[test]
    fn writes_backend_and_provider() {
        let stack = Stack::new(PRODUCER, &settings("acme", "production"));
        let document = stack.to_json();

        assert_eq!(
            json!({
                "bucket": "acme-tf-state",
                "key": "production/networking.tfstate",
                "region": "ca-central-1",
                "encrypt": true,
                "dynamodb_table": "acme-tf-lock",
            }),
            document["terraform"]["backend"]["s3"]
        );
        assert_eq!("ca-central-1", document["provider"]["aws"][0]["region"]);
        assert_eq!(None, document.get("resource"));
    }

    #[test]
    fn references_point_at_declared_blocks() {
        let mut stack = Stack::new(PRODUCER, &settings("acme", "staging"));

        let vpc = stack.module("vpc", json!({ "source": "x" })).unwrap();
        let zones = stack
            .data_source("aws_availability_zones", "zones", json!({}))
            .unwrap();
        let bucket = stack.resource("aws_s3_bucket", "logs", json!({})).unwrap();

        assert_eq!("${module.vpc.vpc_id}", vpc.attr("vpc_id"));
        assert_eq!("${data.aws_availability_zones.zones.names}", zones.attr("names"));
        assert_eq!("aws_s3_bucket.logs", bucket.address());
    }

    #[test]
    fn rejects_duplicate_and_invalid_names() {
        let mut stack = Stack::new(PRODUCER, &settings("acme", "staging"));
        stack.resource("aws_s3_bucket", "logs", json!({})).unwrap();

        match stack.resource("aws_s3_bucket", "logs", json!({})) {
            Err(Error::DuplicateResource { kind, name, .. }) => {
                assert_eq!("aws_s3_bucket", kind);
                assert_eq!("logs", name);
            }
            _ => panic!("Expected `DuplicateResource` error"),
        }
        assert_eq!(
            Err(Error::InvalidName(String::from("ecs/task-role"))),
            stack.resource("aws_iam_role", "ecs/task-role", json!({}))
        );
        assert_eq!(
            Err(Error::InvalidName(String::new())),
            stack.module("", json!({}))
        );
    }

    #[test]
    fn import_adds_remote_state_once() {
        let settings = settings("acme", "staging");
        let mut producer = Stack::new(PRODUCER, &settings);
        let vpc_id = producer
            .export("vpc_id", ValueKind::Identifier, String::from("${module.vpc.vpc_id}"))
            .unwrap();

        let mut consumer = Stack::new(CONSUMER, &settings);
        let first = consumer.import(&vpc_id);
        let second = consumer.import(&vpc_id);

        assert_eq!(first, second);
        assert_eq!("${data.terraform_remote_state.networking.outputs.vpc_id}", first);
        assert_eq!(vec![PRODUCER], consumer.dependencies());
        assert_eq!(&[String::from("vpc_id")], consumer.imported_from(&PRODUCER));

        let document = consumer.to_json();
        assert_eq!(
            json!({
                "backend": "s3",
                "config": {
                    "bucket": "acme-tf-state",
                    "key": "staging/networking.tfstate",
                    "region": "ca-central-1",
                }
            }),
            document["data"]["terraform_remote_state"]["networking"]
        );
    }

    #[test]
    fn import_from_self_uses_local_expression() {
        let mut stack = Stack::new(PRODUCER, &settings("acme", "staging"));
        let vpc_id = stack
            .export("vpc_id", ValueKind::Identifier, String::from("${module.vpc.vpc_id}"))
            .unwrap();

        assert_eq!("${module.vpc.vpc_id}", stack.import(&vpc_id));
        assert_eq!(true, stack.dependencies().is_empty());
    }

    #[test]
    fn security_group_rules_carry_every_attribute() {
        let rules = security_group_rules(&[
            SecurityGroupRule::tcp_from_anywhere(443),
            SecurityGroupRule::all_traffic(),
        ]);

        assert_eq!(
            json!({
                "from_port": 443,
                "to_port": 443,
                "protocol": "tcp",
                "cidr_blocks": ["0.0.0.0/0"],
                "ipv6_cidr_blocks": [],
                "prefix_list_ids": [],
                "security_groups": [],
                "self": false,
                "description": "",
            }),
            rules[0]
        );
        assert_eq!("-1", rules[1]["protocol"]);
        assert_eq!(0, rules[1]["from_port"]);
    }

    #[test]
    fn exports_become_outputs() {
        let mut stack = Stack::new(PRODUCER, &settings("acme", "staging"));
        stack
            .export("vpc_id", ValueKind::Identifier, String::from("${module.vpc.vpc_id}"))
            .unwrap();

        assert_eq!(
            json!({ "vpc_id": { "value": "${module.vpc.vpc_id}" } }),
            stack.to_json()["output"]
        );
        assert_eq!(
            Err(Error::DuplicateResource {
                stack: String::from("Networking"),
                kind: String::from("output"),
                name: String::from("vpc_id"),
            }),
            stack.export("vpc_id", ValueKind::Identifier, String::from("x"))
        );
    }
}
