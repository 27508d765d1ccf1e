use serde_json::json;

use crate::config::Settings;
use crate::outputs::{Binding, StackId, ValueKind};
use crate::stack::{self, Error, Stack};

pub const STACK: StackId = StackId {
    id: "EcrStack",
    state_name: "ecrrepo",
};

#[derive(Debug, Clone, PartialEq)]
pub struct EcrOutputs {
    pub repository_name: Binding,
}

/// Declares the application image repository `{project}-{environment}-app1`.
pub fn build(settings: &Settings) -> Result<(Stack, EcrOutputs), Error> {
    let mut stack = Stack::new(STACK, settings);

    let repository = stack.resource(
        "aws_ecr_repository",
        "ecr_repository",
        json!({
            "name": format!("{}-app1", settings.name_prefix()),
            "image_tag_mutability": "MUTABLE",
            "force_delete": true,
            "tags": stack::tags(settings),
        }),
    )?;

    let outputs = EcrOutputs {
        repository_name: stack.export(
            "app1_ecr_repository_name",
            ValueKind::Identifier,
            repository.attr("name"),
        )?,
    };

    return Ok((stack, outputs));
}
