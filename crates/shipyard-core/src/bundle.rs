//! Deployment bundle documents.
//!
//! A release attempt consumes exactly three documents: the image map, the task
//! specification and the deployment specification. All three are mandatory
//! and their schemas are fixed.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Entry of `imagedefinitions.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDefinition {
    pub name: String,
    pub image_uri: String,
}

/// Contents of `taskdef.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpecDocument {
    pub task_definition_arn: String,
    pub container_definitions: serde_json::Value,
    pub family: String,
    pub task_role_arn: String,
    pub execution_role_arn: String,
    pub network_mode: String,
    pub revision: String,
    pub volumes: serde_json::Value,
    pub requires_compatibilities: Vec<String>,
    pub cpu: String,
    pub memory: String,
}

/// Contents of `appspec.yml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSpec {
    pub version: f64,
    #[serde(rename = "Resources")]
    pub resources: Vec<AppSpecResource>,
}

impl AppSpec {
    /// Deployment specification targeting one ECS service.
    pub fn ecs_service(
        task_definition: &str,
        container_name: &str,
        container_port: u16,
        platform_version: &str,
    ) -> Self {
        Self {
            version: 0.0,
            resources: vec![AppSpecResource {
                target_service: TargetService {
                    kind: "AWS::ECS::Service".to_string(),
                    properties: TargetProperties {
                        task_definition: task_definition.to_string(),
                        load_balancer_info: LoadBalancerInfo {
                            container_name: container_name.to_string(),
                            container_port,
                        },
                        platform_version: platform_version.to_string(),
                    },
                },
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSpecResource {
    #[serde(rename = "TargetService")]
    pub target_service: TargetService,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetService {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "Properties")]
    pub properties: TargetProperties,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TargetProperties {
    pub task_definition: String,
    pub load_balancer_info: LoadBalancerInfo,
    pub platform_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoadBalancerInfo {
    pub container_name: String,
    pub container_port: u16,
}

/// Everything needed to package a bundle.
#[derive(Debug, Clone)]
pub struct BundleInputs {
    pub service_name: String,
    pub image_uri: String,
    pub task_spec: TaskSpecDocument,
    pub container_name: String,
    pub container_port: u16,
    pub platform_version: String,
}

/// A rendered bundle file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleDocument {
    pub filename: &'static str,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentBundle {
    pub image_definitions: Vec<ImageDefinition>,
    pub task_spec: TaskSpecDocument,
    pub app_spec: AppSpec,
}

impl DeploymentBundle {
    pub const IMAGE_DEFINITIONS: &'static str = "imagedefinitions.json";
    pub const TASK_SPEC: &'static str = "taskdef.json";
    pub const APP_SPEC: &'static str = "appspec.yml";
    /// Object key of the packaged archive in the artifact store.
    pub const ARCHIVE_KEY: &'static str = "ecs-defs.zip";

    pub fn package(inputs: BundleInputs) -> Result<Self> {
        let required = [
            ("service name", &inputs.service_name),
            ("image uri", &inputs.image_uri),
            ("container name", &inputs.container_name),
            ("task definition arn", &inputs.task_spec.task_definition_arn),
            ("task family", &inputs.task_spec.family),
        ];
        if let Some((field, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(Error::InvalidInput(format!(
                "deployment bundle is missing {}",
                field
            )));
        }
        if inputs.container_port == 0 {
            return Err(Error::InvalidInput(
                "deployment bundle is missing container port".to_string(),
            ));
        }

        let app_spec = AppSpec::ecs_service(
            &inputs.task_spec.task_definition_arn,
            &inputs.container_name,
            inputs.container_port,
            &inputs.platform_version,
        );

        Ok(Self {
            image_definitions: vec![ImageDefinition {
                name: inputs.service_name,
                image_uri: inputs.image_uri,
            }],
            task_spec: inputs.task_spec,
            app_spec,
        })
    }

    /// Render the three documents in archive order.
    pub fn documents(&self) -> Result<Vec<BundleDocument>> {
        let image_definitions = serde_json::to_string_pretty(&self.image_definitions)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        let task_spec = serde_json::to_string_pretty(&self.task_spec)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        let app_spec =
            serde_yaml::to_string(&self.app_spec).map_err(|e| Error::Serialization(e.to_string()))?;

        Ok(vec![
            BundleDocument {
                filename: Self::IMAGE_DEFINITIONS,
                content: image_definitions,
            },
            BundleDocument {
                filename: Self::TASK_SPEC,
                content: task_spec,
            },
            BundleDocument {
                filename: Self::APP_SPEC,
                content: app_spec,
            },
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task_spec() -> TaskSpecDocument {
        TaskSpecDocument {
            task_definition_arn: "arn:task/app:7".to_string(),
            container_definitions: json!([{"name": "app-name-app"}]),
            family: "app-name-app".to_string(),
            task_role_arn: "arn:role".to_string(),
            execution_role_arn: "arn:role".to_string(),
            network_mode: "awsvpc".to_string(),
            revision: "7".to_string(),
            volumes: json!([]),
            requires_compatibilities: vec!["FARGATE".to_string()],
            cpu: "256".to_string(),
            memory: "512".to_string(),
        }
    }

    fn inputs() -> BundleInputs {
        BundleInputs {
            service_name: "app-name-app".to_string(),
            image_uri: "registry/app-name:latest".to_string(),
            task_spec: task_spec(),
            container_name: "app-name-app".to_string(),
            container_port: 80,
            platform_version: "LATEST".to_string(),
        }
    }

    #[test]
    fn test_package_produces_three_documents() {
        let bundle = DeploymentBundle::package(inputs()).unwrap();
        let docs = bundle.documents().unwrap();

        let names: Vec<_> = docs.iter().map(|d| d.filename).collect();
        assert_eq!(names, vec!["imagedefinitions.json", "taskdef.json", "appspec.yml"]);

        let images: serde_json::Value = serde_json::from_str(&docs[0].content).unwrap();
        assert_eq!(images[0]["imageUri"], "registry/app-name:latest");

        let task: serde_json::Value = serde_json::from_str(&docs[1].content).unwrap();
        assert_eq!(task["taskDefinitionArn"], "arn:task/app:7");
        assert_eq!(task["requiresCompatibilities"][0], "FARGATE");

        assert!(docs[2].content.contains("TargetService"));
        assert!(docs[2].content.contains("ContainerPort: 80"));
        assert!(docs[2].content.contains("PlatformVersion: LATEST"));
    }

    #[test]
    fn test_package_rejects_missing_fields() {
        let mut missing_image = inputs();
        missing_image.image_uri = String::new();
        assert!(matches!(
            DeploymentBundle::package(missing_image),
            Err(Error::InvalidInput(_))
        ));

        let mut missing_port = inputs();
        missing_port.container_port = 0;
        assert!(DeploymentBundle::package(missing_port).is_err());
    }
}
