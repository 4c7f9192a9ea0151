//! 订阅管理状态机。
//!
//! `Disconnected → Connecting → Connected → Disconnected → Connecting …`
//!
//! 每个会话只订阅一次；连接丢失后先释放旧会话，再按指数退避重新连接。

use crate::session::{BrokerConnector, BrokerSession, ConnectionError, ConnectionState};
use bridge_telemetry::{record_connection_error, record_message_received, record_reconnect};
use domain::RawMessage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    pub topic: String,
    pub qos: u8,
    pub reconnect_backoff: Duration,
    pub reconnect_backoff_max: Duration,
}

/// 订阅管理器：独占一个连接器，把收到的消息按序送入有界通道。
pub struct SubscriptionManager {
    connector: Arc<dyn BrokerConnector>,
    config: SubscriptionConfig,
    sender: mpsc::Sender<RawMessage>,
    state: watch::Sender<ConnectionState>,
}

/// 会话结束的原因。
enum SessionEnd {
    Shutdown,
    Lost(ConnectionError),
}

impl SubscriptionManager {
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        config: SubscriptionConfig,
        sender: mpsc::Sender<RawMessage>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            config,
            sender,
            state,
        }
    }

    /// 订阅连接状态变化。
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// 运行直到收到停机信号（`Ok`）或遇到不可恢复的连接错误（`Err`）。
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ConnectionError> {
        let mut backoff = self.config.reconnect_backoff;
        let mut attempt: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.set_state(ConnectionState::Connecting);
            let connected = tokio::select! {
                result = self.connector.connect() => result,
                _ = wait_for_shutdown(&mut shutdown) => break,
            };

            match connected {
                Ok(mut session) => {
                    self.set_state(ConnectionState::Connected);
                    backoff = self.config.reconnect_backoff;
                    attempt = 0;
                    info!(
                        target: "bridge.mqtt",
                        topic = %self.config.topic,
                        qos = self.config.qos,
                        "mqtt_connected"
                    );

                    match self.pump(session.as_mut(), &mut shutdown).await {
                        SessionEnd::Shutdown => {
                            session.disconnect().await;
                            self.set_state(ConnectionState::Disconnected);
                            drop(session);
                            info!(target: "bridge.mqtt", "mqtt_disconnected");
                            return Ok(());
                        }
                        SessionEnd::Lost(err) => {
                            self.set_state(ConnectionState::Disconnected);
                            drop(session);
                            record_connection_error();
                            if err.is_fatal() {
                                error!(target: "bridge.mqtt", cause = "fatal", error = %err, "mqtt_session_lost");
                                return Err(err);
                            }
                            warn!(target: "bridge.mqtt", cause = "transient", error = %err, "mqtt_session_lost");
                        }
                    }
                }
                Err(err) => {
                    self.set_state(ConnectionState::Disconnected);
                    record_connection_error();
                    if err.is_fatal() {
                        error!(target: "bridge.mqtt", cause = "fatal", error = %err, "mqtt_connect_failed");
                        return Err(err);
                    }
                    warn!(target: "bridge.mqtt", cause = "transient", error = %err, "mqtt_connect_failed");
                }
            }

            attempt = attempt.saturating_add(1);
            record_reconnect();
            warn!(
                target: "bridge.mqtt",
                attempt = attempt,
                delay_ms = backoff.as_millis() as u64,
                "mqtt_reconnecting"
            );
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
            backoff = backoff
                .saturating_mul(2)
                .min(self.config.reconnect_backoff_max.max(self.config.reconnect_backoff));
        }

        self.set_state(ConnectionState::Disconnected);
        Ok(())
    }

    /// 订阅并持续投递，直到连接丢失或停机。
    async fn pump(
        &self,
        session: &mut dyn BrokerSession,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        if let Err(err) = session.subscribe(&self.config.topic, self.config.qos).await {
            return SessionEnd::Lost(err);
        }

        loop {
            let message = tokio::select! {
                result = session.recv() => match result {
                    Ok(message) => message,
                    Err(err) => return SessionEnd::Lost(err),
                },
                _ = wait_for_shutdown(shutdown) => return SessionEnd::Shutdown,
            };
            record_message_received();
            debug!(
                target: "bridge.mqtt",
                topic = %message.topic,
                bytes = message.payload.len(),
                "message_received"
            );

            // 通道满时在此挂起，不再从 broker 读取
            tokio::select! {
                sent = self.sender.send(message) => {
                    if sent.is_err() {
                        warn!(target: "bridge.mqtt", "message_channel_closed");
                        return SessionEnd::Shutdown;
                    }
                }
                _ = wait_for_shutdown(shutdown) => return SessionEnd::Shutdown,
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
        debug!(target: "bridge.mqtt", state = state.as_str(), "mqtt_state");
    }
}

/// 停机信号为 true 或发送端关闭时返回。
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
