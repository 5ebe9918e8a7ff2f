//! C2 — durable broker adapter (RabbitMQ / AMQP-0-9-1 via `lapin`).
//!
//! Declares a main queue with a dead-letter exchange + dead-letter
//! queue, publishes persistent messages, and consumes with manual ack.
//! Retry is explicit republish-with-incremented-header rather than
//! requeue, so the attempt history travels with the message.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use deadpool_lapin::{Config as PoolConfig, Pool, Runtime};
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions, QueuePurgeOptions,
    },
    types::{AMQPValue, FieldTable, LongLongInt, ShortString},
    BasicProperties, ExchangeKind,
};
use serde::Serialize;
use tracing::{error, warn};

use crate::config::BrokerConfig;
use crate::error::{AppError, AppResult};

const RETRY_HEADER: &str = "x-retry-count";
const LAST_ERROR_HEADER: &str = "x-last-error";

#[derive(Clone)]
pub struct BrokerAdapter {
    pool: Pool,
    max_retries: u32,
    prefetch: u16,
}

impl BrokerAdapter {
    pub async fn connect(config: &BrokerConfig) -> AppResult<Self> {
        let pool_config = PoolConfig {
            url: Some(config.url.clone()),
            ..Default::default()
        };
        let pool = pool_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| AppError::Internal(format!("amqp pool init: {e}")))?;

        // Touch the pool once at startup so a misconfigured URL fails fast.
        let _ = pool
            .get()
            .await
            .map_err(|e| AppError::Internal(format!("amqp connect: {e}")))?;

        Ok(Self {
            pool,
            max_retries: config.max_retries,
            prefetch: config.prefetch,
        })
    }

    async fn channel(&self) -> AppResult<lapin::Channel> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::Internal(format!("amqp pool checkout: {e}")))?;
        conn.create_channel()
            .await
            .map_err(|e| AppError::Internal(format!("amqp channel: {e}")))
    }

    /// Declare the durable main queue plus its dead-letter exchange/queue,
    /// per the broker protocol: `{name}.dlx` (direct, durable), `{name}.dlq`
    /// (durable, bound to the DLX on routing key `name`), and the main
    /// queue `name` with `x-dead-letter-exchange = {name}.dlx`.
    pub async fn assert_queue(&self, name: &str) -> AppResult<()> {
        let channel = self.channel().await?;
        let dlx = format!("{name}.dlx");
        let dlq = format!("{name}.dlq");

        channel
            .exchange_declare(
                &dlx,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| AppError::Internal(format!("declare dlx: {e}")))?;

        channel
            .queue_declare(
                &dlq,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| AppError::Internal(format!("declare dlq: {e}")))?;

        channel
            .queue_bind(
                &dlq,
                &dlx,
                name,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| AppError::Internal(format!("bind dlq: {e}")))?;

        let mut main_args = FieldTable::default();
        main_args.insert(
            ShortString::from("x-dead-letter-exchange"),
            AMQPValue::LongString(dlx.clone().into()),
        );
        main_args.insert(
            ShortString::from("x-dead-letter-routing-key"),
            AMQPValue::LongString(name.to_string().into()),
        );

        channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                main_args,
            )
            .await
            .map_err(|e| AppError::Internal(format!("declare main queue: {e}")))?;

        Ok(())
    }

    pub async fn publish<T: Serialize>(&self, queue: &str, message: &T) -> AppResult<()> {
        let channel = self.channel().await?;
        let body = serde_json::to_vec(message)
            .map_err(|e| AppError::Internal(format!("encode job: {e}")))?;

        channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default().with_delivery_mode(2), // persistent
            )
            .await
            .map_err(|e| AppError::Internal(format!("publish: {e}")))?
            .await
            .map_err(|e| AppError::Internal(format!("publish confirm: {e}")))?;

        Ok(())
    }

    /// Consume `queue` at bounded prefetch, invoking `handler` per
    /// message. On success, ack. On handler error, republish with the
    /// retry header incremented (and ack the original) until
    /// `max_retries` is exceeded, at which point nack without requeue
    /// routes the message to the DLQ via the queue's DLX binding.
    pub async fn consume<F, Fut>(&self, queue: &str, handler: F) -> AppResult<()>
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send,
    {
        let channel = self.channel().await?;
        channel
            .basic_qos(self.prefetch, lapin::options::BasicQosOptions::default())
            .await
            .map_err(|e| AppError::Internal(format!("qos: {e}")))?;

        let mut consumer = channel
            .basic_consume(
                queue,
                "prediction-worker",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| AppError::Internal(format!("consume: {e}")))?;

        let handler = Arc::new(handler);
        let max_retries = self.max_retries;
        let queue = queue.to_string();
        let channel = Arc::new(channel);

        use futures::StreamExt;
        while let Some(delivery) = consumer.next().await {
            let delivery = match delivery {
                Ok(d) => d,
                Err(e) => {
                    error!("amqp delivery error: {e}");
                    continue;
                }
            };

            let body: serde_json::Value = match serde_json::from_slice(&delivery.data) {
                Ok(v) => v,
                Err(e) => {
                    warn!("malformed job body, routing to DLQ: {e}");
                    let _ = delivery
                        .nack(BasicNackOptions {
                            requeue: false,
                            ..Default::default()
                        })
                        .await;
                    continue;
                }
            };

            match handler(body.clone()).await {
                Ok(()) => {
                    if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                        error!("ack failed: {e}");
                    }
                }
                Err(err) => {
                    let retry_count = delivery
                        .properties
                        .headers()
                        .as_ref()
                        .and_then(|h| h.inner().get(RETRY_HEADER))
                        .and_then(|v| match v {
                            AMQPValue::LongLongInt(n) => Some(*n as u32),
                            _ => None,
                        })
                        .unwrap_or(0);

                    if retry_count < max_retries {
                        let mut headers = delivery
                            .properties
                            .headers()
                            .clone()
                            .unwrap_or_default();
                        headers.insert(
                            ShortString::from(RETRY_HEADER),
                            AMQPValue::LongLongInt(retry_count as LongLongInt + 1),
                        );
                        headers.insert(
                            ShortString::from(LAST_ERROR_HEADER),
                            AMQPValue::LongString(err.to_string().into()),
                        );

                        let props = BasicProperties::default()
                            .with_delivery_mode(2)
                            .with_headers(headers);

                        if let Err(e) = channel
                            .basic_publish(
                                "",
                                &queue,
                                BasicPublishOptions::default(),
                                &delivery.data,
                                props,
                            )
                            .await
                        {
                            error!("retry republish failed: {e}");
                        }
                        let _ = delivery.ack(BasicAckOptions::default()).await;
                    } else {
                        warn!("job exhausted retries, routing to DLQ: {err}");
                        let _ = delivery
                            .nack(BasicNackOptions {
                                requeue: false,
                                ..Default::default()
                            })
                            .await;
                    }
                }
            }
        }

        Ok(())
    }

    /// Best-effort queue depth; returns 0 on error or a non-finite value.
    pub async fn queue_message_count(&self, queue: &str) -> u32 {
        match self.channel().await {
            Ok(channel) => match channel
                .queue_declare(
                    queue,
                    QueueDeclareOptions {
                        passive: true,
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
            {
                Ok(q) => q.message_count(),
                Err(_) => 0,
            },
            Err(_) => 0,
        }
    }

    pub async fn purge_queue(&self, queue: &str) -> AppResult<()> {
        let channel = self.channel().await?;
        channel
            .queue_purge(queue, QueuePurgeOptions::default())
            .await
            .map_err(|e| AppError::Internal(format!("purge: {e}")))?;
        Ok(())
    }

    pub async fn is_healthy(&self) -> bool {
        self.channel().await.is_ok()
    }
}

/// Reconnect with capped exponential backoff, used at process start and
/// whenever a connect attempt fails outright (pool checkout errors are
/// handled per-call by `deadpool_lapin` itself).
pub async fn connect_with_backoff(config: &BrokerConfig) -> AppResult<BrokerAdapter> {
    let mut delay = Duration::from_millis(200);
    let max_delay = Duration::from_secs(30);
    let mut attempts = 0;
    loop {
        match BrokerAdapter::connect(config).await {
            Ok(adapter) => return Ok(adapter),
            Err(e) if attempts < 5 => {
                attempts += 1;
                warn!("broker connect attempt {attempts} failed: {e}, retrying in {delay:?}");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(max_delay);
            }
            Err(e) => {
                error!("broker connect failed after {attempts} attempts: {e}");
                return Err(e);
            }
        }
    }
}
