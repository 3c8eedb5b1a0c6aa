use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    pub service_bind: String,

    pub service_port: u16,

    #[envconfig(default = "development")]
    pub environment: String,

    #[envconfig(default = "sqlite:file:mailroom?mode=memory&cache=shared")]
    pub database_url: String,

    #[envconfig(default = "5")]
    pub max_db_connections: u32,

    pub trace_destination: Option<String>,

    pub metrics_destination: Option<String>,

    pub log_file_name: Option<String>,
}

impl Config {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.service_bind, self.service_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn loads_from_environment() {
        let config = Config::init_from_hashmap(&env(&[
            ("SERVICE_BIND", "127.0.0.1"),
            ("SERVICE_PORT", "8080"),
            ("ENVIRONMENT", "production"),
        ]))
        .expect("configuration should load");

        assert_eq!(config.bind(), "127.0.0.1:8080");
        assert_eq!(config.environment, "production");
        assert_eq!(config.max_db_connections, 5);
        assert!(config.trace_destination.is_none());
        assert!(config.metrics_destination.is_none());
        assert!(config.log_file_name.is_none());
    }

    #[test]
    fn environment_defaults_to_development() {
        let config = Config::init_from_hashmap(&env(&[
            ("SERVICE_BIND", "0.0.0.0"),
            ("SERVICE_PORT", "3000"),
        ]))
        .expect("configuration should load");

        assert_eq!(config.environment, "development");
    }

    #[test]
    fn missing_bind_address_fails() {
        assert!(Config::init_from_hashmap(&env(&[("SERVICE_PORT", "8080")])).is_err());
    }

    #[test]
    fn unparseable_port_fails() {
        let result = Config::init_from_hashmap(&env(&[
            ("SERVICE_BIND", "127.0.0.1"),
            ("SERVICE_PORT", "not-a-port"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn port_out_of_range_fails() {
        let result = Config::init_from_hashmap(&env(&[
            ("SERVICE_BIND", "127.0.0.1"),
            ("SERVICE_PORT", "70000"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn sink_destinations_are_optional() {
        let config = Config::init_from_hashmap(&env(&[
            ("SERVICE_BIND", "127.0.0.1"),
            ("SERVICE_PORT", "8080"),
            ("TRACE_DESTINATION", "/tmp/traces.json"),
        ]))
        .expect("configuration should load");

        assert_eq!(config.trace_destination.as_deref(), Some("/tmp/traces.json"));
        assert!(config.metrics_destination.is_none());
    }
}
