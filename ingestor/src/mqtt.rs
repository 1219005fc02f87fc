use crate::errors::{Error, IngestError, Result, StoreError};
use crate::metrics::{MESSAGES_TOTAL, REJECTED_TOTAL};
use crate::model::WriteOutcome;
use crate::pipeline::IngestPipeline;
use crate::shadow::{CalibrationDocument, ShadowDocument};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 100;
const MAX_BACKOFF_MS: u64 = 2000;

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub broker: String,
    pub port: u16,
    pub client_id: String,
    pub shadow_topic: String,
    pub calibration_topic: String,
    pub store_timeout: Duration,
}

/// Which pipeline entry point a topic feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Shadow,
    Calibration,
}

pub async fn run_mqtt(settings: MqttSettings, pipeline: IngestPipeline) -> Result<()> {
    info!(
        "Connecting to MQTT broker at {}:{}",
        settings.broker, settings.port
    );

    let mut mqtt_options =
        MqttOptions::new(settings.client_id.clone(), settings.broker.clone(), settings.port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_session(false);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 10000);

    for topic in [&settings.shadow_topic, &settings.calibration_topic] {
        client
            .subscribe(topic.as_str(), QoS::AtLeastOnce)
            .await
            .map_err(Error::Mqtt)?;
        info!("Subscribed to {} with QoS 1", topic);
    }

    loop {
        match eventloop.poll().await {
            Ok(notification) => {
                if let Event::Incoming(Packet::Publish(publish)) = notification {
                    MESSAGES_TOTAL.inc();

                    debug!(
                        "Received message on topic {}, size: {} bytes",
                        publish.topic,
                        publish.payload.len()
                    );

                    let Some(route) = route_for(&settings, &publish.topic) else {
                        warn!("No route for topic {}", publish.topic);
                        continue;
                    };

                    match process_message_with_retry(
                        route,
                        &publish.payload,
                        &pipeline,
                        settings.store_timeout,
                    )
                    .await
                    {
                        Ok(outcome) => debug!(?outcome, "Message handled"),
                        Err(e) => {
                            error!("Failed to process message after retries: {}", e);
                            REJECTED_TOTAL.inc();
                        }
                    }
                }
            }
            Err(e) => {
                error!("MQTT error: {}", e);
                // rumqttc automatically reconnects, so we just log and continue
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

fn route_for(settings: &MqttSettings, topic: &str) -> Option<Route> {
    if topic_matches(&settings.shadow_topic, topic) {
        Some(Route::Shadow)
    } else if topic_matches(&settings.calibration_topic, topic) {
        Some(Route::Calibration)
    } else {
        None
    }
}

/// MQTT filter matching with `+` and trailing `#` wildcards.
fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut levels = topic.split('/');
    for part in filter.split('/') {
        match part {
            "#" => return true,
            "+" => {
                if levels.next().is_none() {
                    return false;
                }
            }
            literal => {
                if levels.next() != Some(literal) {
                    return false;
                }
            }
        }
    }
    levels.next().is_none()
}

/// Process a message with exponential backoff retry
async fn process_message_with_retry(
    route: Route,
    payload: &[u8],
    pipeline: &IngestPipeline,
    store_timeout: Duration,
) -> Result<WriteOutcome> {
    let mut attempt = 0;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        attempt += 1;

        match process_message(route, payload, pipeline, store_timeout).await {
            Ok(outcome) => {
                if attempt > 1 {
                    info!("Message processed successfully on attempt {}", attempt);
                }
                return Ok(outcome);
            }
            Err(e) => {
                if attempt >= MAX_RETRIES {
                    return Err(e);
                }

                if !is_retryable_error(&e) {
                    warn!("Non-retryable error: {}", e);
                    return Err(e);
                }

                warn!(
                    "Message processing failed (attempt {}/{}): {}. Retrying in {}ms...",
                    attempt, MAX_RETRIES, e, backoff_ms
                );

                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }
        }
    }
}

/// Decode one payload and hand it to the pipeline under a deadline.
async fn process_message(
    route: Route,
    payload: &[u8],
    pipeline: &IngestPipeline,
    store_timeout: Duration,
) -> Result<WriteOutcome> {
    match route {
        Route::Shadow => {
            let transition = ShadowDocument::from_slice(payload)?.into_transition();
            Ok(with_deadline(store_timeout, pipeline.ingest(transition)).await?)
        }
        Route::Calibration => {
            let update = CalibrationDocument::from_slice(payload)?.into_update();
            Ok(with_deadline(store_timeout, pipeline.ingest_calibration(update)).await?)
        }
    }
}

/// A store call that outlives the deadline counts as the store being unavailable.
pub async fn with_deadline<F>(
    deadline: Duration,
    call: F,
) -> std::result::Result<WriteOutcome, IngestError>
where
    F: Future<Output = std::result::Result<WriteOutcome, IngestError>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(IngestError::Store(StoreError::Unavailable(format!(
            "no response within {}ms",
            deadline.as_millis()
        )))),
    }
}

/// Determine if an error is retryable
fn is_retryable_error(error: &Error) -> bool {
    match error {
        Error::Ingest(e) => e.is_retryable(),

        // Bad payloads won't become valid with retry
        Error::Decode(_) => false,
        Error::Mqtt(_) => false, // MQTT errors handled at connection level
        Error::Database(_) | Error::Config(_) => false,
    }
}
