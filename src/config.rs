use aws_config::meta::region::RegionProviderChain;
use aws_types::region::Region;
use serde::{Deserialize, Serialize};
use std::{fs, io, path::PathBuf};
use validator::{Validate, ValidationError};

use crate::cidr::Cidr;

pub const DEFAULT_REGION: &str = "ca-central-1";
pub const DEFAULT_PROJECT_NAME: &str = "local-project";
pub const DEFAULT_ENVIRONMENT_NAME: &str = "development";
pub const DEFAULT_APP_DOMAIN_NAME: &str = "app1.example.com";
pub const DEFAULT_HOSTED_ZONE_NAME: &str = "dev.example.com";
pub const DEFAULT_APP_PORT: u16 = 80;
pub const DEFAULT_IMAGE_TAG: &str = "latest";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("File {0} not found")]
    FileNotFound(String),

    #[error("Parsing error: {0}")]
    ParsingError(String),

    #[error("Validation errors: {0}")]
    ValidationError(String),

    #[error("Required environment variable {0} is not set")]
    MissingVariable(String),

    #[error("Environment variable {name} has an invalid value `{value}`")]
    InvalidVariable { name: String, value: String },

    #[error("Unknown error occurred: {0}")]
    Unknown(String),
}

/// How the certificate's DNS validation records are declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateValidation {
    /// One record per domain validation option.
    AllOptions,
    /// A single record built from option 0. Only correct for single-name certificates.
    FirstOption,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct HealthCheck {
    #[validate(length(min = 1))]
    pub path: String,

    #[validate(range(min = 5, max = 300))]
    pub interval: u32,

    #[validate(range(min = 2, max = 120))]
    pub timeout: u32,

    #[validate(range(min = 2, max = 10))]
    pub healthy_threshold: u32,

    #[validate(range(min = 2, max = 10))]
    pub unhealthy_threshold: u32,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            path: String::from("/"),
            interval: 30,
            timeout: 5,
            healthy_threshold: 2,
            unhealthy_threshold: 2,
        }
    }
}

/// Resource sizing and fixed ranges. Every field has a default, so a sizing
/// file only needs the values it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_subnets"))]
pub struct Sizing {
    #[validate(custom = "validate_cidr")]
    pub vpc_cidr: String,

    #[validate(length(min = 1))]
    pub public_subnets: Vec<String>,

    #[validate(length(min = 1))]
    pub private_subnets: Vec<String>,

    #[validate(range(min = 256))]
    pub task_cpu: u32,

    #[validate(range(min = 512))]
    pub task_memory: u32,

    pub desired_count: u32,

    #[validate(range(min = 1, max = 50000))]
    pub listener_rule_priority: u32,

    #[validate]
    pub health_check: HealthCheck,

    #[validate(range(min = 1, max = 4000))]
    pub lb_idle_timeout: u32,

    pub validation_record_ttl: u32,

    pub certificate_validation: CertificateValidation,
}

impl Default for Sizing {
    fn default() -> Self {
        Self {
            vpc_cidr: String::from("10.0.0.0/16"),
            public_subnets: vec![
                String::from("10.0.0.0/24"),
                String::from("10.0.1.0/24"),
                String::from("10.0.2.0/24"),
            ],
            private_subnets: vec![
                String::from("10.0.20.0/24"),
                String::from("10.0.21.0/24"),
                String::from("10.0.22.0/24"),
            ],
            task_cpu: 256,
            task_memory: 512,
            desired_count: 1,
            listener_rule_priority: 100,
            health_check: HealthCheck::default(),
            lb_idle_timeout: 60,
            validation_record_ttl: 60,
            certificate_validation: CertificateValidation::AllOptions,
        }
    }
}

/// Where every stack keeps its Terraform state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct RemoteBackend {
    #[validate(length(min = 3, max = 63))]
    pub bucket: String,

    #[validate(length(min = 3, max = 255))]
    pub lock_table: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct AppSettings {
    #[validate(range(min = 1))]
    pub port: u16,

    #[validate(length(min = 1))]
    pub domain_name: String,

    #[validate(length(min = 1))]
    pub hosted_zone_name: String,

    #[validate(length(min = 1, max = 128))]
    pub image_tag: String,
}

/// Everything the stacks are built from. Read once at start-up and passed by
/// reference into every stack builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Settings {
    #[validate(length(min = 1))]
    pub project_name: String,

    #[validate(length(min = 1))]
    pub region: String,

    #[validate(length(min = 1))]
    pub environment_name: String,

    #[validate]
    pub backend: RemoteBackend,

    #[validate]
    pub app: AppSettings,

    #[validate]
    pub sizing: Sizing,
}

impl Settings {
    /// Builds settings from a variable lookup, applying the literal defaults
    /// for anything unset. The region has already been resolved.
    pub fn from_lookup<F>(lookup: F, region: String, sizing: Sizing) -> Result<Settings, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let or_default =
            |name: &str, default: &str| lookup(name).unwrap_or_else(|| String::from(default));
        let required = |name: &str| match lookup(name) {
            Some(value) => Ok(value),
            None => Err(Error::MissingVariable(String::from(name))),
        };

        let port = match lookup("APP_PORT") {
            Some(raw) => match raw.trim().parse::<u16>() {
                Ok(port) => port,
                Err(_) => {
                    return Err(Error::InvalidVariable {
                        name: String::from("APP_PORT"),
                        value: raw,
                    })
                }
            },
            None => DEFAULT_APP_PORT,
        };

        let settings = Settings {
            project_name: or_default("PROJECT_NAME", DEFAULT_PROJECT_NAME),
            region,
            environment_name: or_default("APP_ENV", DEFAULT_ENVIRONMENT_NAME),
            backend: RemoteBackend {
                bucket: required("REMOTE_BACKEND_BUCKET_NAME")?,
                lock_table: required("REMOTE_BACKEND_DYNAMODB_TABLE_NAME")?,
            },
            app: AppSettings {
                port,
                domain_name: or_default("APP_DOMAIN_NAME", DEFAULT_APP_DOMAIN_NAME),
                hosted_zone_name: or_default("ROUTE53_HOSTED_ZONE_NAME", DEFAULT_HOSTED_ZONE_NAME),
                image_tag: or_default("APP1_CONTAINER_IMAGE_TAG", DEFAULT_IMAGE_TAG),
            },
            sizing,
        };

        match settings.validate() {
            Ok(_) => (),
            Err(error) => return Err(Error::ValidationError(error.to_string())),
        }

        return Ok(settings);
    }

    /// `{project}-{environment}`, the prefix of every named resource.
    pub fn name_prefix(&self) -> String {
        format!("{}-{}", self.project_name, self.environment_name)
    }
}

/// `AWS_REGION` when set, otherwise `ca-central-1`. Profiles and instance
/// metadata are not consulted.
pub async fn resolve_region(configured: Option<String>) -> String {
    let region = RegionProviderChain::first_try(configured.map(Region::new))
        .or_else(Region::new(DEFAULT_REGION))
        .region()
        .await;

    return match region {
        Some(region) => region.as_ref().to_string(),
        None => String::from(DEFAULT_REGION),
    };
}

pub fn parse_sizing(path: &PathBuf) -> Result<Sizing, Error> {
    let contents = match fs::read_to_string(path) {
        Ok(raw_contents) => Ok(raw_contents),
        Err(error) => match error.kind() {
            io::ErrorKind::NotFound => Err(Error::FileNotFound(path.display().to_string())),
            _ => Err(Error::Unknown(error.to_string())),
        },
    }?;

    let sizing: Sizing = match serde_yaml::from_str(&contents) {
        Ok(data) => Ok(data),
        Err(error) => Err(Error::ParsingError(error.to_string())),
    }?;

    match sizing.validate() {
        Ok(_) => (),
        Err(error) => return Err(Error::ValidationError(error.to_string())),
    }

    return Ok(sizing);
}

fn validate_cidr(raw: &str) -> Result<(), ValidationError> {
    match raw.parse::<Cidr>() {
        Ok(_) => Ok(()),
        Err(_) => Err(ValidationError::new("Not a valid IPv4 CIDR block")),
    }
}

fn validate_subnets(sizing: &Sizing) -> Result<(), ValidationError> {
    let vpc: Cidr = match sizing.vpc_cidr.parse() {
        Ok(cidr) => cidr,
        Err(_) => return Err(ValidationError::new("Not a valid IPv4 CIDR block")),
    };

    if sizing.public_subnets.len() != sizing.private_subnets.len() {
        return Err(ValidationError::new(
            "Public and private subnet lists must have one entry per availability zone",
        ));
    }

    let mut subnets: Vec<Cidr> = Vec::new();
    for raw in sizing.public_subnets.iter().chain(&sizing.private_subnets) {
        let subnet: Cidr = match raw.parse() {
            Ok(cidr) => cidr,
            Err(_) => return Err(ValidationError::new("Not a valid IPv4 CIDR block")),
        };
        if !vpc.contains(&subnet) {
            return Err(ValidationError::new("Subnet is outside the VPC CIDR block"));
        }
        if subnets.iter().any(|existing| existing.overlaps(&subnet)) {
            return Err(ValidationError::new("Subnets must not overlap"));
        }
        subnets.push(subnet);
    }

    return Ok(());
}
