//! Loading and publishing of the YAML definition file
//!
//! The file is the authoring hand-off point: the excluded authoring
//! subsystem exports services and API configurations, the server loads
//! them read-only at startup.

use dialgate_core::application::definition_service::ServiceDefinitionService;
use dialgate_core::{ExternalApiConfig, ServiceDefinition};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ServerError, ServerResult};

/// Parsed contents of a definition file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefinitionFile {
    /// External API configurations, published before the services that
    /// reference them
    #[serde(default)]
    pub apis: Vec<ExternalApiConfig>,

    /// Service flow graphs
    #[serde(default)]
    pub services: Vec<ServiceDefinition>,
}

/// Read and parse a definition file
pub fn load_file(path: &str) -> ServerResult<DefinitionFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ServerError::IoError(format!("failed to read {}: {}", path, e)))?;
    serde_yaml::from_str(&raw)
        .map_err(|e| ServerError::DefinitionError(format!("{}: {}", path, e)))
}

/// Publish every API configuration and service in the file
pub async fn publish_all(
    definitions: &ServiceDefinitionService,
    file: DefinitionFile,
) -> ServerResult<()> {
    let api_count = file.apis.len();
    let service_count = file.services.len();

    for api in file.apis {
        definitions.publish_api(api).await?;
    }
    for service in file.services {
        definitions.publish(service).await?;
    }

    info!(
        apis = api_count,
        services = service_count,
        "published definitions"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
apis:
  - id: balance_api
    name: Balance lookup
    url: https://bank.example/balance
    method: post
    timeout_ms: 5000
    retry_attempts: 2
    auth:
      type: bearer
      token: secret-token
    response_mapping:
      - response_path: data.balance
        state_key: balance
    success_criteria:
      - path: status
        op: equals
        expected: ok

services:
  - id: "*100#"
    name: Demo Bank
    flows:
      - id: main
        service_id: "*100#"
        title: Demo Bank
        is_root: true
        options:
          - selector: "1"
            label: Check Balance
            action:
              type: navigate
            next_flow: balance
            position: 0
      - id: balance
        service_id: "*100#"
        title: Balance
        text: "Your balance is {{balance}}"
        kind:
          type: dynamic
          api_id: balance_api
          continuation:
            type: end
        options: []
"#;

    #[test]
    fn test_parse_sample_yaml() {
        let file: DefinitionFile = serde_yaml::from_str(SAMPLE).unwrap();

        assert_eq!(file.apis.len(), 1);
        assert_eq!(file.apis[0].timeout_ms, 5000);
        assert_eq!(file.apis[0].retry_attempts, 2);
        assert_eq!(file.services.len(), 1);
        assert_eq!(file.services[0].flows.len(), 2);
        assert!(file.services[0].flows[1].is_dynamic());
        file.services[0].validate().unwrap();
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = load_file("/nonexistent/definitions.yaml");
        assert!(matches!(result, Err(ServerError::IoError(_))));
    }
}
