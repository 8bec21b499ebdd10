//! Pure option building for rumqttc connections
//!
//! Turns the transport-neutral endpoint and options into `MqttOptions`,
//! choosing plain TCP or TLS from the requested [`Security`].

use crate::transport::{Endpoint, QoS, Security, TransportError, TransportOptions};
use rumqttc::v5::{mqttbytes::QoS as RumqttcQoS, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use uuid::Uuid;

/// Build rumqttc options for one connection attempt
pub fn configure_mqtt_options(
    endpoint: &Endpoint,
    options: &TransportOptions,
    security: Security,
) -> Result<MqttOptions, TransportError> {
    if endpoint.host.is_empty() {
        return Err(TransportError::InvalidOptions("empty broker host".to_string()));
    }
    if endpoint.port == 0 {
        return Err(TransportError::InvalidOptions("broker port must be positive".to_string()));
    }

    let client_id = build_client_id(options.client_id.as_deref());
    let mut mqtt_options = MqttOptions::new(client_id, endpoint.host.clone(), endpoint.port);

    if security == Security::Secure {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username) = &options.username {
        let password = options.password.clone().unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(options.keep_alive);
    mqtt_options.set_max_packet_size(options.max_packet_size);

    Ok(mqtt_options)
}

/// Unique client id per connection attempt so a half-dead predecessor
/// cannot make the broker kick the new session
pub fn build_client_id(prefix: Option<&str>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    match prefix {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}-{}", &suffix[..12]),
        _ => format!("mqtt-supervisor-{}", &suffix[..12]),
    }
}

pub fn to_rumqttc_qos(qos: QoS) -> RumqttcQoS {
    match qos {
        QoS::AtMostOnce => RumqttcQoS::AtMostOnce,
        QoS::AtLeastOnce => RumqttcQoS::AtLeastOnce,
        QoS::ExactlyOnce => RumqttcQoS::ExactlyOnce,
    }
}

pub fn from_rumqttc_qos(qos: RumqttcQoS) -> QoS {
    match qos {
        RumqttcQoS::AtMostOnce => QoS::AtMostOnce,
        RumqttcQoS::AtLeastOnce => QoS::AtLeastOnce,
        RumqttcQoS::ExactlyOnce => QoS::ExactlyOnce,
    }
}
