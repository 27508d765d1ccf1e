use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use crate::config::Settings;
use crate::outputs::{Binding, StackId};
use crate::stack::{self, Stack};
use crate::stacks::{application, ecr, networking, shared};
use crate::writer::{self, Manifest};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Stack {0} is added twice")]
    DuplicateStack(String),

    #[error("Stack {stack} reads from {producer}, which has not been added before it")]
    UnknownProducer { stack: String, producer: String },

    #[error("Stack error: {0}")]
    Stack(#[from] stack::Error),

    #[error("Unable to write {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<writer::Error> for Error {
    fn from(error: writer::Error) -> Self {
        match error {
            writer::Error::Io { path, reason } => Error::Io { path, reason },
            writer::Error::Serialization(reason) => Error::Serialization(reason),
        }
    }
}

/// A binding together with the stacks that read it.
#[derive(Debug, Clone, PartialEq)]
pub struct BindingReport {
    pub binding: Binding,
    pub consumers: Vec<StackId>,
}

/// The ordered set of stacks handed to Terraform.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct App {
    stacks: Vec<Stack>,
}

impl App {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stack. Every stack it imports from must already be present.
    pub fn add(&mut self, stack: Stack) -> Result<(), Error> {
        let id = stack.id();
        if self.stacks.iter().any(|existing| existing.id() == id) {
            return Err(Error::DuplicateStack(id.id.to_string()));
        }

        for producer in stack.dependencies() {
            if !self.stacks.iter().any(|existing| existing.id() == producer) {
                return Err(Error::UnknownProducer {
                    stack: id.id.to_string(),
                    producer: producer.id.to_string(),
                });
            }
        }

        self.stacks.push(stack);
        return Ok(());
    }

    #[cfg(test)]
    pub fn stacks(&self) -> &[Stack] {
        &self.stacks
    }

    /// Every exported binding, in stack order, with its consumers.
    pub fn bindings(&self) -> Vec<BindingReport> {
        let mut consumers: BTreeMap<(StackId, &str), Vec<StackId>> = BTreeMap::new();
        for stack in &self.stacks {
            for producer in stack.dependencies() {
                for name in stack.imported_from(&producer) {
                    consumers
                        .entry((producer, name.as_str()))
                        .or_default()
                        .push(stack.id());
                }
            }
        }

        self.stacks
            .iter()
            .flat_map(|stack| stack.exports())
            .map(|binding| BindingReport {
                binding: binding.clone(),
                consumers: consumers
                    .get(&(binding.producer, binding.name.as_str()))
                    .cloned()
                    .unwrap_or_default(),
            })
            .collect()
    }

    pub fn synth(&self, out_dir: &Path) -> Result<Manifest, Error> {
        let manifest = writer::write(out_dir, &self.stacks)?;
        info!(
            stacks = self.stacks.len(),
            out_dir = %out_dir.display(),
            "Synthesis complete"
        );

        return Ok(manifest);
    }
}

/// Builds the four stacks in dependency order. Returns the app and the
/// application outputs shown to the operator.
pub fn compose(settings: &Settings) -> Result<(App, application::ApplicationOutputs), Error> {
    let mut app = App::new();

    let (ecr_stack, ecr_outputs) = ecr::build(settings)?;
    app.add(ecr_stack)?;

    let (networking_stack, networking_outputs) = networking::build(settings)?;
    app.add(networking_stack)?;

    let (shared_stack, shared_outputs) = shared::build(settings, &networking_outputs)?;
    app.add(shared_stack)?;

    let (application_stack, application_outputs) = application::build(
        settings,
        &ecr_outputs,
        &networking_outputs,
        &shared_outputs,
    )?;
    app.add(application_stack)?;

    return Ok((app, application_outputs));
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::compose;
    use super::App;
    use super::Error;
    use crate::config::tests::settings;
    use crate::stacks::{application, ecr, networking, shared};
    use tempfile::tempdir;

    #[test]
    fn composes_all_four_stacks_in_order() {
        let (app, outputs) = compose(&settings("acme", "production")).unwrap();

        let ids: Vec<&str> = app.stacks().iter().map(|stack| stack.id().id).collect();
        assert_eq!(vec!["EcrStack", "Networking", "CommonResource", "Application"], ids);
        assert_eq!("https://app1.acme.com", outputs.application_url.expression);

        for report in app.bindings() {
            assert_eq!(false, report.binding.expression.is_empty());
        }
    }

    #[test]
    fn rejects_consumer_added_before_its_producer() {
        let settings = settings("acme", "staging");
        let (networking_stack, networking_outputs) = networking::build(&settings).unwrap();
        let (shared_stack, _) = shared::build(&settings, &networking_outputs).unwrap();

        let mut app = App::new();
        assert_eq!(
            Err(Error::UnknownProducer {
                stack: String::from("CommonResource"),
                producer: String::from("Networking"),
            }),
            app.add(shared_stack.clone())
        );

        app.add(networking_stack).unwrap();
        app.add(shared_stack).unwrap();
    }

    #[test]
    fn rejects_duplicate_stack() {
        let settings = settings("acme", "staging");
        let (stack, _) = ecr::build(&settings).unwrap();

        let mut app = App::new();
        app.add(stack.clone()).unwrap();
        assert_eq!(
            Err(Error::DuplicateStack(String::from("EcrStack"))),
            app.add(stack)
        );
    }

    #[test]
    fn reports_binding_consumers() {
        let (app, _) = compose(&settings("acme", "staging")).unwrap();
        let bindings = app.bindings();

        let vpc_id = bindings
            .iter()
            .find(|report| report.binding.name == "vpc_id")
            .unwrap();
        assert_eq!(networking::STACK, vpc_id.binding.producer);
        assert_eq!(vec![shared::STACK, application::STACK], vpc_id.consumers);

        let repository = bindings
            .iter()
            .find(|report| report.binding.name == "app1_ecr_repository_name")
            .unwrap();
        assert_eq!(vec![application::STACK], repository.consumers);

        let url = bindings
            .iter()
            .find(|report| report.binding.name == "application_url")
            .unwrap();
        assert_eq!(true, url.consumers.is_empty());

        assert_eq!(11, bindings.len());
    }

    #[test]
    fn identical_inputs_synthesize_identical_documents() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();

        let (app, _) = compose(&settings("acme", "production")).unwrap();
        let (again, _) = compose(&settings("acme", "production")).unwrap();
        assert_eq!(app, again);

        app.synth(first.path()).unwrap();
        again.synth(second.path()).unwrap();

        for id in ["EcrStack", "Networking", "CommonResource", "Application"] {
            let path = format!("stacks/{}/cdk.tf.json", id);
            assert_eq!(
                fs::read_to_string(first.path().join(&path)).unwrap(),
                fs::read_to_string(second.path().join(&path)).unwrap()
            );
        }
        assert_eq!(
            fs::read_to_string(first.path().join("manifest.json")).unwrap(),
            fs::read_to_string(second.path().join("manifest.json")).unwrap()
        );
    }

    #[test]
    fn synth_into_a_file_reports_io_error() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("out");
        fs::write(&blocker, "not a directory").unwrap();
        let (app, _) = compose(&settings("acme", "staging")).unwrap();

        match app.synth(&blocker).err().unwrap() {
            Error::Io { path, .. } => {
                assert_eq!(true, path.starts_with(&blocker.display().to_string()))
            }
            _ => panic!("Expected `Io` error"),
        }
    }

    #[test]
    fn manifest_records_state_keys_and_dependencies() {
        let dir = tempdir().unwrap();
        let (app, _) = compose(&settings("acme", "production")).unwrap();

        let manifest = app.synth(dir.path()).unwrap();

        assert_eq!(4, manifest.stacks.len());
        assert_eq!(
            "production/common-resource.tfstate",
            manifest.stacks["CommonResource"].state_key
        );
        assert_eq!(
            vec!["CommonResource", "EcrStack", "Networking"],
            manifest.stacks["Application"].dependencies
        );
        assert_eq!(
            vec!["Networking"],
            manifest.stacks["CommonResource"].dependencies
        );
    }
}
