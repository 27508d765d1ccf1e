use serde_json::{json, Value};

use crate::config::Settings;
use crate::outputs::{Binding, StackId, ValueKind};
use crate::stack::{self, Error, SecurityGroupRule, Stack};
use crate::stacks::ecr::EcrOutputs;
use crate::stacks::networking::NetworkingOutputs;
use crate::stacks::shared::SharedOutputs;

pub const STACK: StackId = StackId {
    id: "Application",
    state_name: "application",
};

pub const CONTAINER_NAME: &str = "app";

/// Pull actions scoped to the application repository.
pub const ECR_READ_ACTIONS: [&str; 3] = [
    "ecr:BatchCheckLayerAvailability",
    "ecr:GetDownloadUrlForLayer",
    "ecr:BatchGetImage",
];

pub const LOG_ACTIONS: [&str; 3] = [
    "logs:CreateLogGroup",
    "logs:CreateLogStream",
    "logs:PutLogEvents",
];

#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationOutputs {
    pub application_url: Binding,
}

/// Declares the app1 service: roles, task definition, security group, target
/// group, listener rule, Fargate service and DNS alias.
pub fn build(
    settings: &Settings,
    ecr: &EcrOutputs,
    networking: &NetworkingOutputs,
    shared: &SharedOutputs,
) -> Result<(Stack, ApplicationOutputs), Error> {
    let mut stack = Stack::new(STACK, settings);
    let prefix = settings.name_prefix();
    let sizing = &settings.sizing;
    let app = &settings.app;

    let repository_name = stack.import(&ecr.repository_name);
    let vpc_id = stack.import(&networking.vpc_id);
    let private_subnet_ids = stack.import(&networking.private_subnet_ids);
    let cluster_name = stack.import(&shared.ecs_cluster_name);
    let load_balancer_dns_name = stack.import(&shared.load_balancer_dns_name);
    let load_balancer_zone_id = stack.import(&shared.load_balancer_zone_id);
    let load_balancer_security_group_id = stack.import(&shared.load_balancer_security_group_id);
    let https_listener_arn = stack.import(&shared.load_balancer_listener_https_arn);

    let repository = stack.data_source(
        "aws_ecr_repository",
        "app1",
        json!({ "name": repository_name }),
    )?;

    let execution_role = stack.resource(
        "aws_iam_role",
        "ecs_task_execution_role",
        json!({
            "name": format!("{}-ecs-task-execution-role", prefix),
            "path": "/ecs/",
            "assume_role_policy": document_string(&assume_role_policy()),
            "tags": stack::tags(settings),
        }),
    )?;
    let execution_policy = stack.resource(
        "aws_iam_policy",
        "ecs_task_execution_policy",
        json!({
            "name": format!("{}-ecs-task-execution-policy", prefix),
            "policy": document_string(&execution_policy(&repository.attr("arn"))),
            "tags": stack::tags(settings),
        }),
    )?;
    stack.resource(
        "aws_iam_policy_attachment",
        "ecs_task_execution_policy_attachment",
        json!({
            "name": format!("{}-ecs-task-execution-policy-attachment", prefix),
            "roles": [execution_role.attr("name")],
            "policy_arn": execution_policy.attr("arn"),
        }),
    )?;

    // No policies: the container gets no AWS API access until one is attached.
    let task_role = stack.resource(
        "aws_iam_role",
        "ecs_task_role",
        json!({
            "name": format!("{}-ecs-task-role", prefix),
            "path": "/ecs/",
            "assume_role_policy": document_string(&assume_role_policy()),
            "tags": stack::tags(settings),
        }),
    )?;

    let container_definitions = json!([{
        "name": CONTAINER_NAME,
        "image": format!("{}:{}", repository.attr("repository_url"), app.image_tag),
        "cpu": sizing.task_cpu,
        "memory": sizing.task_memory,
        "essential": true,
        "portMappings": [{
            "containerPort": app.port,
            "hostPort": app.port,
            "protocol": "tcp",
        }],
    }]);
    let task_definition = stack.resource(
        "aws_ecs_task_definition",
        "ecs_task_definition",
        json!({
            "family": format!("{}-task", prefix),
            "network_mode": "awsvpc",
            "requires_compatibilities": ["FARGATE"],
            "cpu": sizing.task_cpu.to_string(),
            "memory": sizing.task_memory.to_string(),
            "execution_role_arn": execution_role.attr("arn"),
            "task_role_arn": task_role.attr("arn"),
            "container_definitions": document_string(&container_definitions),
            "tags": stack::tags(settings),
        }),
    )?;

    let security_group = stack.resource(
        "aws_security_group",
        "ecs_security_group",
        json!({
            "name": format!("{}-ecs-security-group", prefix),
            "description": "Security group for ECS service",
            "vpc_id": vpc_id,
            "ingress": stack::security_group_rules(&[SecurityGroupRule {
                from_port: app.port,
                to_port: app.port,
                protocol: "tcp",
                security_groups: vec![load_balancer_security_group_id],
                description: String::from("Allow traffic from load balancer"),
                ..SecurityGroupRule::default()
            }]),
            "egress": stack::security_group_rules(&[SecurityGroupRule::all_traffic()]),
            "tags": stack::tags(settings),
        }),
    )?;

    let target_group = stack.resource(
        "aws_lb_target_group",
        "load_balancer_target_group",
        json!({
            "lifecycle": { "create_before_destroy": true },
            "name_prefix": "app1-",
            "port": app.port,
            "protocol": "HTTP",
            "vpc_id": vpc_id,
            "target_type": "ip",
            "health_check": {
                "path": sizing.health_check.path,
                "interval": sizing.health_check.interval,
                "timeout": sizing.health_check.timeout,
                "healthy_threshold": sizing.health_check.healthy_threshold,
                "unhealthy_threshold": sizing.health_check.unhealthy_threshold,
            },
            "tags": stack::tags(settings),
        }),
    )?;

    stack.resource(
        "aws_lb_listener_rule",
        "load_balancer_listener_rule",
        json!({
            "listener_arn": https_listener_arn,
            "priority": sizing.listener_rule_priority,
            "action": [{
                "type": "forward",
                "target_group_arn": target_group.attr("arn"),
            }],
            "condition": [{
                "host_header": { "values": [app.domain_name] },
            }],
            "tags": stack::tags(settings),
        }),
    )?;

    stack.resource(
        "aws_ecs_service",
        "ecs_service",
        json!({
            "name": format!("{}-ecs-service", prefix),
            "cluster": cluster_name,
            "task_definition": task_definition.attr("arn"),
            "desired_count": sizing.desired_count,
            "launch_type": "FARGATE",
            "network_configuration": {
                "subnets": private_subnet_ids,
                "security_groups": [security_group.attr("id")],
                "assign_public_ip": false,
            },
            "load_balancer": [{
                "target_group_arn": target_group.attr("arn"),
                "container_name": CONTAINER_NAME,
                "container_port": app.port,
            }],
            "tags": stack::tags(settings),
        }),
    )?;

    let zone = stack.data_source(
        "aws_route53_zone",
        "route53_zone",
        json!({
            "name": app.hosted_zone_name,
            "private_zone": false,
        }),
    )?;
    stack.resource(
        "aws_route53_record",
        "app1_dns_record",
        json!({
            "zone_id": zone.attr("zone_id"),
            "name": format!("app1.{}", zone.attr("name")),
            "type": "A",
            "alias": {
                "name": load_balancer_dns_name,
                "zone_id": load_balancer_zone_id,
                "evaluate_target_health": true,
            },
        }),
    )?;

    let outputs = ApplicationOutputs {
        application_url: stack.export(
            "application_url",
            ValueKind::Scalar,
            format!("https://{}", app.domain_name),
        )?,
    };

    return Ok((stack, outputs));
}

fn assume_role_policy() -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Action": "sts:AssumeRole",
            "Effect": "Allow",
            "Principal": { "Service": "ecs-tasks.amazonaws.com" },
        }],
    })
}

/// Log writes and image pulls. `ecr:GetAuthorizationToken` cannot be scoped
/// to a repository, the pull actions are scoped to `repository_arn`.
fn execution_policy(repository_arn: &str) -> Value {
    let mut statements: Vec<Value> = LOG_ACTIONS
        .iter()
        .map(|action| json!({ "Action": action, "Effect": "Allow", "Resource": "*" }))
        .collect();
    statements.push(json!({
        "Action": "ecr:GetAuthorizationToken",
        "Effect": "Allow",
        "Resource": "*",
    }));
    statements.extend(ECR_READ_ACTIONS.iter().map(|action| {
        json!({ "Action": action, "Effect": "Allow", "Resource": repository_arn })
    }));

    json!({
        "Version": "2012-10-17",
        "Statement": statements,
    })
}

/// Policies and container definitions are passed to the provider as JSON strings.
fn document_string(document: &Value) -> String {
    document.to_string()
}
