mod shadow;

use chrono::Utc;
use clap::Parser;
use rand::Rng;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use shadow::{
    CalibrationBounds, CalibrationDocument, CalibrationState, Reported, ShadowDocument,
    ShadowState, TreeState,
};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const COLORS: [&str; 3] = ["red", "green", "blue"];

/// Publishes device shadow updates for a fleet of simulated trees.
#[derive(Debug, Parser)]
#[command(name = "twin-simulator")]
struct Args {
    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    broker: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    port: u16,

    /// Shadow updates published per second across all devices.
    #[arg(long, env = "RATE", default_value_t = 100)]
    rate: u64,

    #[arg(long, env = "DEVICES", default_value_t = 10)]
    devices: usize,

    /// Probability that a report differs from the previous one.
    #[arg(long, env = "CHANGE_PROBABILITY", default_value_t = 0.1)]
    change_probability: f64,

    /// Number of control buttons that publish calibration bounds at startup.
    #[arg(long, env = "BUTTONS", default_value_t = 2)]
    buttons: i64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting device shadow simulator");
    info!(
        "Broker: {}:{}, Rate: {} msg/s, Devices: {}, Change probability: {}",
        args.broker, args.port, args.rate, args.devices, args.change_probability
    );

    let client_id = format!("sim-{}", uuid::Uuid::new_v4());

    let mut mqtt_options = MqttOptions::new(&client_id, &args.broker, args.port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_session(true);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 20000);

    // Spawn eventloop handler
    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                error!("MQTT eventloop error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    });

    tokio::time::sleep(Duration::from_secs(2)).await;

    let mut rng = rand::thread_rng();
    publish_calibration(&client, &mut rng, args.buttons).await;

    info!("Connected to MQTT broker, starting to publish shadow updates");

    let mut states: Vec<Option<TreeState>> = vec![None; args.devices.max(1)];
    let interval = Duration::from_micros(1_000_000 / args.rate.max(1));
    let mut counter = 0u64;

    loop {
        let tick = std::time::Instant::now();
        let slot = (counter % states.len() as u64) as usize;
        let device = format!("tree{}", slot + 1);

        let previous = states[slot].clone();
        let current = match &previous {
            Some(state) if !rng.gen_bool(args.change_probability.clamp(0.0, 1.0)) => state.clone(),
            _ => random_state(&mut rng),
        };

        let document = ShadowDocument {
            device: &device,
            timestamp: Utc::now().timestamp(),
            previous: previous.as_ref().map(|state| ShadowState {
                state: Reported { reported: state },
                client_token: uuid::Uuid::new_v4().to_string(),
            }),
            current: ShadowState {
                state: Reported {
                    reported: &current,
                },
                client_token: uuid::Uuid::new_v4().to_string(),
            },
        };

        let topic = format!("shadow/{}/documents", device);
        match serde_json::to_string(&document) {
            Ok(payload) => match client.publish(&topic, QoS::AtLeastOnce, false, payload).await {
                Ok(_) => counter += 1,
                Err(e) => warn!("Failed to publish: {}", e),
            },
            Err(e) => error!("Failed to serialize shadow document: {}", e),
        }
        states[slot] = Some(current);

        if counter > 0 && counter % 1000 == 0 {
            info!("Published {} shadow updates", counter);
        }

        let elapsed = tick.elapsed();
        if elapsed < interval {
            tokio::time::sleep(interval - elapsed).await;
        }
    }
}

async fn publish_calibration(client: &AsyncClient, rng: &mut impl Rng, buttons: i64) {
    for button_id in 1..=buttons {
        let min = rng.gen_range(15..20);
        let document = CalibrationDocument {
            button_id,
            state: CalibrationState {
                reported: CalibrationBounds {
                    min,
                    max: min + rng.gen_range(3..8),
                },
            },
        };

        let payload = match serde_json::to_string(&document) {
            Ok(p) => p,
            Err(e) => {
                error!("Failed to serialize calibration: {}", e);
                continue;
            }
        };
        let topic = format!("calibration/{}", button_id);
        if let Err(e) = client.publish(&topic, QoS::AtLeastOnce, false, payload).await {
            warn!("Failed to publish calibration for button {}: {}", button_id, e);
        }
    }
}

fn random_state(rng: &mut impl Rng) -> TreeState {
    TreeState {
        temperature: rng.gen_range(15..30).to_string(),
        led3: COLORS[rng.gen_range(0..COLORS.len())].to_string(),
        warm_pad: rng.gen_range(0..3).to_string(),
        warm_pad_state: if rng.gen_bool(0.5) { "on" } else { "off" }.to_string(),
    }
}
