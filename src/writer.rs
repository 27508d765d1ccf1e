use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::stack::Stack;

pub const MANIFEST_VERSION: &str = "0.20.0";
pub const STACK_FILE_NAME: &str = "cdk.tf.json";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Unable to write {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackManifest {
    pub name: String,
    pub working_directory: String,
    pub synthesized_stack_path: String,
    pub state_key: String,
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Manifest {
    pub version: String,
    pub stacks: BTreeMap<String, StackManifest>,
}

/// Writes `stacks/<id>/cdk.tf.json` for every stack and `manifest.json` next to them.
pub fn write(out_dir: &Path, stacks: &[Stack]) -> Result<Manifest, Error> {
    let mut manifest = Manifest {
        version: String::from(MANIFEST_VERSION),
        stacks: BTreeMap::new(),
    };

    for stack in stacks {
        let id = stack.id().id;
        let working_directory = format!("stacks/{}", id);
        let synthesized_stack_path = format!("{}/{}", working_directory, STACK_FILE_NAME);

        create_dir(&out_dir.join(&working_directory))?;
        write_json(&out_dir.join(&synthesized_stack_path), &stack.to_json())?;
        info!(stack = id, path = %synthesized_stack_path, "Synthesized stack");

        manifest.stacks.insert(
            id.to_string(),
            StackManifest {
                name: id.to_string(),
                working_directory,
                synthesized_stack_path,
                state_key: stack.state_key(),
                dependencies: stack
                    .dependencies()
                    .iter()
                    .map(|producer| producer.id.to_string())
                    .collect(),
            },
        );
    }

    write_json(&out_dir.join("manifest.json"), &manifest)?;

    return Ok(manifest);
}

fn create_dir(path: &Path) -> Result<(), Error> {
    match fs::create_dir_all(path) {
        Ok(_) => Ok(()),
        Err(error) => Err(Error::Io {
            path: path.display().to_string(),
            reason: error.to_string(),
        }),
    }
}

fn write_json<T: Serialize>(path: &Path, contents: &T) -> Result<(), Error> {
    let file_contents = match serde_json::to_string_pretty(contents) {
        Ok(serialized) => serialized,
        Err(error) => return Err(Error::Serialization(error.to_string())),
    };

    match fs::write(path, file_contents) {
        Ok(_) => Ok(()),
        Err(error) => Err(Error::Io {
            path: path.display().to_string(),
            reason: error.to_string(),
        }),
    }
}
