use serde::Serialize;

/// Identity of a stack: the id it is synthesized under and the name of its
/// state file (`{environment}/{state_name}.tfstate`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StackId {
    pub id: &'static str,
    pub state_name: &'static str,
}

impl StackId {
    pub fn state_key(&self, environment_name: &str) -> String {
        format!("{}/{}.tfstate", environment_name, self.state_name)
    }

    /// Name of the `terraform_remote_state` block that reads this stack.
    pub fn remote_state_name(&self) -> String {
        self.state_name.replace('-', "_")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Identifier,
    IdentifierList,
    Scalar,
}

/// A named value a stack exposes as a Terraform output. Bindings are produced
/// once by the stack that declares them and never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Binding {
    pub producer: StackId,
    pub name: String,
    pub kind: ValueKind,
    /// Expression evaluated inside the producer, e.g. `${module.vpc.vpc_id}`.
    pub expression: String,
}

impl Binding {
    /// The expression a consumer uses to read this binding from the producer's state.
    pub fn remote_expression(&self) -> String {
        format!(
            "${{data.terraform_remote_state.{}.outputs.{}}}",
            self.producer.remote_state_name(),
            self.name
        )
    }
}
