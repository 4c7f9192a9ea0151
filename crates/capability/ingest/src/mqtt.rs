//! rumqttc 会话实现。

use crate::session::{BrokerConnector, BrokerSession, ConnectionError};
use async_trait::async_trait;
use domain::RawMessage;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    SubscribeReasonCode,
};
use std::time::Duration;
use tracing::debug;

/// MQTT 连接配置。
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub receive_timeout: Duration,
}

/// MQTT 连接器：每次 `connect` 都新建客户端与事件循环。
#[derive(Debug, Clone)]
pub struct MqttConnector {
    config: MqttConfig,
    client_id: String,
}

impl MqttConnector {
    pub fn new(config: MqttConfig) -> Self {
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("sensor-bridge-{}", uuid::Uuid::new_v4()));
        Self { config, client_id }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.client_id.clone(),
            self.config.host.clone(),
            self.config.port,
        );
        options.set_keep_alive(self.config.keep_alive.max(Duration::from_secs(5)));
        options.set_clean_session(true);
        if let (Some(username), Some(password)) =
            (self.config.username.as_ref(), self.config.password.as_ref())
        {
            options.set_credentials(username, password);
        }
        options
    }
}

#[async_trait]
impl BrokerConnector for MqttConnector {
    async fn connect(&self) -> Result<Box<dyn BrokerSession>, ConnectionError> {
        let (client, mut eventloop) = AsyncClient::new(self.options(), 10);
        let timeout = self.config.connect_timeout;
        match tokio::time::timeout(timeout, wait_for_connack(&mut eventloop)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ConnectionError::Transient(format!(
                    "no connack within {}s",
                    timeout.as_secs()
                )));
            }
        }
        debug!(
            target: "bridge.mqtt",
            host = %self.config.host,
            port = self.config.port,
            client_id = %self.client_id,
            "mqtt_connack"
        );
        Ok(Box::new(MqttSession {
            client,
            eventloop,
            receive_timeout: self.config.receive_timeout,
            topic: String::new(),
        }))
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), ConnectionError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return match ack.code {
                    ConnectReturnCode::Success => Ok(()),
                    code => Err(classify_refusal(code)),
                };
            }
            Ok(_) => {}
            Err(err) => return Err(classify_error(err)),
        }
    }
}

/// 已连接的 rumqttc 会话。
pub struct MqttSession {
    client: AsyncClient,
    eventloop: EventLoop,
    receive_timeout: Duration,
    topic: String,
}

#[async_trait]
impl BrokerSession for MqttSession {
    async fn subscribe(&mut self, topic: &str, qos: u8) -> Result<(), ConnectionError> {
        self.topic = topic.to_string();
        self.client
            .subscribe(topic, map_qos(qos))
            .await
            .map_err(|err| ConnectionError::Transient(err.to_string()))
    }

    async fn recv(&mut self) -> Result<RawMessage, ConnectionError> {
        loop {
            let event = tokio::time::timeout(self.receive_timeout, self.eventloop.poll())
                .await
                .map_err(|_| {
                    ConnectionError::Transient(format!(
                        "no traffic within {}s",
                        self.receive_timeout.as_secs()
                    ))
                })?
                .map_err(classify_error)?;
            match event {
                Event::Incoming(Packet::Publish(publish)) => {
                    return Ok(RawMessage::now(publish.topic, publish.payload.to_vec()));
                }
                // SUBACK 拒绝（如 ACL）重连也无法恢复
                Event::Incoming(Packet::SubAck(ack)) => {
                    if ack
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure))
                    {
                        return Err(ConnectionError::Fatal(format!(
                            "subscription refused: {}",
                            self.topic
                        )));
                    }
                    debug!(target: "bridge.mqtt", topic = %self.topic, "mqtt_subscribed");
                }
                Event::Incoming(Packet::Disconnect) => {
                    return Err(ConnectionError::Transient(
                        "broker closed the session".to_string(),
                    ));
                }
                _ => {}
            }
        }
    }

    async fn disconnect(&mut self) {
        if self.client.disconnect().await.is_err() {
            return;
        }
        // 事件循环发出 DISCONNECT 后才算真正断开
        let _ = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;
    }
}

fn map_qos(qos: u8) -> QoS {
    match qos {
        2 => QoS::ExactlyOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::AtMostOnce,
    }
}

/// 认证、客户端 ID 与协议版本被拒属于配置问题，重连无法恢复。
fn classify_refusal(code: ConnectReturnCode) -> ConnectionError {
    let message = format!("connection refused: {:?}", code);
    match code {
        ConnectReturnCode::BadUserNamePassword
        | ConnectReturnCode::NotAuthorized
        | ConnectReturnCode::BadClientId
        | ConnectReturnCode::RefusedProtocolVersion => ConnectionError::Fatal(message),
        _ => ConnectionError::Transient(message),
    }
}

fn classify_error(err: rumqttc::ConnectionError) -> ConnectionError {
    match err {
        rumqttc::ConnectionError::ConnectionRefused(code) => classify_refusal(code),
        other => ConnectionError::Transient(other.to_string()),
    }
}
