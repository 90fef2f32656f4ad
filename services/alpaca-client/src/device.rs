//! Typed wrappers for the methods every Alpaca device type shares

use serde_json::Value;

use crate::connection::ConnectionManager;
use crate::transport::ResponseEnvelope;

impl ConnectionManager {
    pub async fn connected(&self) -> Option<bool> {
        self.get_property_as("connected", &[]).await
    }

    pub async fn set_connected(&self, connected: bool) -> Option<ResponseEnvelope> {
        self.set_property("connected", &[("Connected", connected.to_string())])
            .await
    }

    pub async fn name(&self) -> Option<String> {
        self.get_property_as("name", &[]).await
    }

    pub async fn description(&self) -> Option<String> {
        self.get_property_as("description", &[]).await
    }

    /// Driver information, split on commas
    pub async fn driver_info(&self) -> Option<Vec<String>> {
        let info: String = self.get_property_as("driverinfo", &[]).await?;
        Some(
            info.split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(String::from)
                .collect(),
        )
    }

    pub async fn driver_version(&self) -> Option<String> {
        self.get_property_as("driverversion", &[]).await
    }

    pub async fn interface_version(&self) -> Option<i32> {
        self.get_property_as("interfaceversion", &[]).await
    }

    pub async fn supported_actions(&self) -> Option<Vec<String>> {
        self.get_property_as("supportedactions", &[]).await
    }

    /// Invoke a driver-specific action and return its string result
    pub async fn action(&self, action: &str, parameters: &str) -> Option<String> {
        let envelope = self
            .set_property(
                "action",
                &[
                    ("Action", action.to_string()),
                    ("Parameters", parameters.to_string()),
                ],
            )
            .await?;
        match envelope.value {
            Value::String(s) => Some(s),
            Value::Null => Some(String::new()),
            other => Some(other.to_string()),
        }
    }

    /// Returns whether the device accepted the command
    pub async fn command_blind(&self, command: &str, raw: bool) -> bool {
        self.set_property("commandblind", &command_params(command, raw))
            .await
            .is_some()
    }

    pub async fn command_bool(&self, command: &str, raw: bool) -> Option<bool> {
        let envelope = self
            .set_property("commandbool", &command_params(command, raw))
            .await?;
        envelope.value.as_bool()
    }

    pub async fn command_string(&self, command: &str, raw: bool) -> Option<String> {
        let envelope = self
            .set_property("commandstring", &command_params(command, raw))
            .await?;
        envelope.value.as_str().map(String::from)
    }
}

fn command_params(command: &str, raw: bool) -> [(&'static str, String); 2] {
    [("Command", command.to_string()), ("Raw", raw.to_string())]
}
