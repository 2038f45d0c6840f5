use std::{
    collections::HashMap,
    future::Future,
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, OnceLock, RwLock},
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Serialize;
use tokio::{net::TcpListener, sync::Mutex, task::JoinHandle};
use tracing::{debug, info, warn};

use eco_thermostat_common::{
    entity_command_topic, parse_state_topic, ActuatorGateway, Climate, ContactRegistry,
    EntityCommand, GatewayError, HvacMode, NumericSink, RuntimeConfig, SensorRegistry,
    SensorValue, StateTopic, ThermostatConfig, ThermostatStatePayload, TracingObserver,
    TOPIC_CMD_MODE, TOPIC_CMD_POWER, TOPIC_CMD_PRESET, TOPIC_CMD_TARGET, TOPIC_STATE_WILDCARD,
    TOPIC_THERMOSTAT_STATE,
};

const MAX_MQTT_PAYLOAD_BYTES: usize = 512;

#[derive(Clone)]
struct AppState {
    climate: Arc<Mutex<Climate>>,
    home: Arc<MqttHome>,
    triggers: Arc<Triggers>,
    mqtt: AsyncClient,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

struct MqttHome {
    states: RwLock<HashMap<String, String>>,
    local_temps: RwLock<HashMap<String, f64>>,
    mqtt: AsyncClient,
}

impl MqttHome {
    fn new(mqtt: AsyncClient) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            local_temps: RwLock::new(HashMap::new()),
            mqtt,
        }
    }

    fn record_state(&self, entity: &str, state: &str) -> bool {
        let mut states = self.states.write().unwrap_or_else(|err| err.into_inner());
        let previous = states.insert(entity.to_string(), state.to_string());
        previous.as_deref() != Some(state)
    }

    fn record_local_temp(&self, actuator: &str, raw: &str) {
        let mut temps = self.local_temps.write().unwrap_or_else(|err| err.into_inner());
        match SensorValue::from_state(Some(raw)).value() {
            Some(temp) => {
                temps.insert(actuator.to_string(), temp);
            }
            None => {
                temps.remove(actuator);
            }
        }
    }

    fn state(&self, entity: &str) -> Option<String> {
        self.states
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .get(entity)
            .cloned()
    }

    fn command(
        &self,
        entity: &str,
        command: EntityCommand,
        payload: String,
    ) -> Result<(), GatewayError> {
        self.mqtt
            .try_publish(
                entity_command_topic(entity, command),
                QoS::AtLeastOnce,
                false,
                payload,
            )
            .map_err(|err| GatewayError::Rejected {
                entity: entity.to_string(),
                reason: err.to_string(),
            })
    }
}

impl SensorRegistry for MqttHome {
    fn get_value(&self, entity_id: &str) -> SensorValue {
        SensorValue::from_state(self.state(entity_id).as_deref())
    }
}

impl ContactRegistry for MqttHome {
    fn is_open(&self, entity_id: &str) -> bool {
        self.state(entity_id)
            .is_some_and(|state| is_open_state(&state))
    }
}

impl ActuatorGateway for MqttHome {
    fn set_mode(&self, actuator_id: &str, mode: HvacMode) -> Result<(), GatewayError> {
        self.command(actuator_id, EntityCommand::HvacMode, mode.as_str().to_string())
    }

    fn set_target(&self, actuator_id: &str, temp: f64) -> Result<(), GatewayError> {
        self.command(actuator_id, EntityCommand::Temperature, format!("{temp:.1}"))
    }

    fn get_reported_local_temp(&self, actuator_id: &str) -> Option<f64> {
        self.local_temps
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .get(actuator_id)
            .copied()
    }
}

impl NumericSink for MqttHome {
    fn set_value(&self, entity_id: &str, value: f64) -> Result<(), GatewayError> {
        self.command(entity_id, EntityCommand::SetValue, format!("{value:.1}"))?;
        // Last write wins until the entity echoes its own state.
        self.record_state(entity_id, &value.to_string());
        Ok(())
    }
}

fn is_open_state(state: &str) -> bool {
    matches!(
        state.trim().to_ascii_lowercase().as_str(),
        "on" | "open" | "true"
    )
}

#[derive(Debug)]
struct Triggers {
    sensors: Vec<String>,
    windows: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Refresh,
    Reevaluate,
}

impl Triggers {
    fn new(config: &ThermostatConfig) -> Self {
        let mut sensors = vec![config.sensor_temp.clone()];
        sensors.extend(config.sensor_humidity.clone());
        Self {
            sensors,
            windows: config.windows.clone(),
        }
    }

    fn classify(&self, entity: &str) -> Option<Trigger> {
        if self.sensors.iter().any(|id| id == entity) {
            Some(Trigger::Refresh)
        } else if self.windows.iter().any(|id| id == entity) {
            Some(Trigger::Reevaluate)
        } else {
            None
        }
    }
}

struct ScheduledTask {
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    fn every<F, Fut>(period: Duration, mut job: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                job().await;
            }
        });
        Self { handle }
    }

    fn cancel(self) {
        self.handle.abort();
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut runtime = load_runtime_config().await?;
    apply_env_overrides(&mut runtime, |key| std::env::var(key).ok());

    let climate = Climate::new(runtime.thermostat.clone(), TracingObserver)
        .context("invalid thermostat configuration")?;
    info!(
        "{} controlling {} (modes: {})",
        runtime.thermostat.name,
        runtime.thermostat.heater,
        climate
            .engine()
            .supported_modes()
            .iter()
            .map(|mode| mode.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let mqtt_config = &runtime.mqtt;
    let mut mqtt_options = MqttOptions::new(
        mqtt_config.client_id.clone(),
        mqtt_config.host.clone(),
        mqtt_config.port,
    );
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    if !mqtt_config.user.is_empty() {
        mqtt_options.set_credentials(mqtt_config.user.clone(), mqtt_config.pass.clone());
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let app_state = AppState {
        climate: Arc::new(Mutex::new(climate)),
        home: Arc::new(MqttHome::new(mqtt.clone())),
        triggers: Arc::new(Triggers::new(&runtime.thermostat)),
        mqtt,
    };

    spawn_mqtt_loop(app_state.clone(), eventloop);

    let periodic = {
        let app_state = app_state.clone();
        ScheduledTask::every(Duration::from_secs(runtime.eval_interval_secs), move || {
            let app_state = app_state.clone();
            async move {
                {
                    let mut climate = app_state.climate.lock().await;
                    climate.refresh(app_state.home.as_ref(), monotonic_ms());
                }
                publish_state(&app_state).await;
            }
        })
    };

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/target", post(handle_set_target))
        .route("/api/mode", post(handle_set_mode))
        .route("/api/preset", post(handle_set_preset))
        .with_state(app_state);

    let port = std::env::var("CONTROLLER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    periodic.cancel();
    info!("controller stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
}

async fn load_runtime_config() -> anyhow::Result<RuntimeConfig> {
    let path = std::env::var("THERMOSTAT_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./.thermostat/runtime.json"));

    match tokio::fs::read(&path).await {
        Ok(raw) => RuntimeConfig::from_json(&raw)
            .with_context(|| format!("failed to load {}", path.display())),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            warn!("{} not found, using defaults", path.display());
            Ok(RuntimeConfig::default())
        }
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

fn apply_env_overrides(runtime: &mut RuntimeConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(host) = lookup("MQTT_HOST") {
        runtime.mqtt.host = host;
    }
    if let Some(port) = lookup("MQTT_PORT").and_then(|value| value.parse::<u16>().ok()) {
        runtime.mqtt.port = port;
    }
    if let Some(user) = lookup("MQTT_USER") {
        runtime.mqtt.user = user;
    }
    if let Some(pass) = lookup("MQTT_PASS") {
        runtime.mqtt.pass = pass;
    }
    if let Some(secs) = lookup("EVAL_INTERVAL_SECS").and_then(|value| value.parse::<u64>().ok()) {
        runtime.eval_interval_secs = secs.max(1);
    }
}

fn subscribe_topics(mqtt: &AsyncClient) {
    let topics = [
        TOPIC_STATE_WILDCARD,
        TOPIC_CMD_MODE,
        TOPIC_CMD_TARGET,
        TOPIC_CMD_PRESET,
        TOPIC_CMD_POWER,
    ];

    for topic in topics {
        if let Err(err) = mqtt.try_subscribe(topic, QoS::AtMostOnce) {
            warn!("subscribe to {topic} failed: {err}");
        }
    }
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    handle_mqtt_message(&app_state, &message.topic, &message.payload).await;
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                    subscribe_topics(&app_state.mqtt);
                    app_state.climate.lock().await.resync();
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

async fn handle_mqtt_message(app_state: &AppState, topic: &str, payload: &[u8]) {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return;
    }
    let Ok(message) = std::str::from_utf8(payload) else {
        warn!("dropping non utf8 MQTT payload on topic {topic}");
        return;
    };
    let message = message.trim();
    let now_ms = monotonic_ms();
    let home = app_state.home.as_ref();

    let accepted = match topic {
        TOPIC_CMD_MODE => match HvacMode::parse(message) {
            Some(mode) => app_state.climate.lock().await.set_mode(mode, home, now_ms),
            None => {
                warn!("ignoring unknown mode {message:?}");
                false
            }
        },
        TOPIC_CMD_TARGET => match message.parse::<f64>() {
            Ok(temp) => app_state.climate.lock().await.set_target(temp, home, now_ms),
            Err(_) => {
                warn!("ignoring invalid target {message:?}");
                false
            }
        },
        TOPIC_CMD_PRESET => app_state
            .climate
            .lock()
            .await
            .set_preset(message, home, now_ms),
        TOPIC_CMD_POWER => {
            let mut climate = app_state.climate.lock().await;
            match message.to_ascii_lowercase().as_str() {
                "on" => climate.turn_on(home, now_ms),
                "off" => climate.turn_off(home, now_ms),
                _ => false,
            }
        }
        _ => match parse_state_topic(topic) {
            Some(StateTopic::Entity(entity)) => {
                if !app_state.home.record_state(entity, message) {
                    return;
                }
                debug!("{entity} -> {message}");
                let mut climate = app_state.climate.lock().await;
                match app_state.triggers.classify(entity) {
                    Some(Trigger::Refresh) => {
                        climate.refresh(home, now_ms);
                        true
                    }
                    Some(Trigger::Reevaluate) => {
                        climate.reevaluate(home, now_ms);
                        true
                    }
                    None => false,
                }
            }
            Some(StateTopic::LocalTemperature(actuator)) => {
                app_state.home.record_local_temp(actuator, message);
                false
            }
            None => false,
        },
    };

    if accepted {
        publish_state(app_state).await;
    }
}

async fn status_payload(state: &AppState) -> ThermostatStatePayload {
    let climate = state.climate.lock().await;
    ThermostatStatePayload {
        decision: climate.decision(),
        attributes: climate.attributes(state.home.as_ref()),
        updated_epoch: Utc::now().timestamp(),
    }
}

async fn publish_state(state: &AppState) {
    let payload = status_payload(state).await;
    match serde_json::to_vec(&payload) {
        Ok(body) => {
            // Never wait on the request queue: the MQTT loop that drains it may
            // be the caller.
            if let Err(err) = state
                .mqtt
                .try_publish(TOPIC_THERMOSTAT_STATE, QoS::AtLeastOnce, true, body)
            {
                warn!("thermostat state publish failed: {err}");
            }
        }
        Err(err) => warn!("thermostat state serialization failed: {err}"),
    }
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(status_payload(&state).await)
}

async fn handle_set_target(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Ok(target) = value.parse::<f64>() else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid temperature value");
    };

    let accepted = {
        let mut climate = state.climate.lock().await;
        climate.set_target(target, state.home.as_ref(), monotonic_ms())
    };
    if !accepted {
        return error_response(StatusCode::BAD_REQUEST, "Invalid temperature value");
    }

    publish_state(&state).await;
    handle_get_status(State(state)).await.into_response()
}

async fn handle_set_mode(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Some(mode) = HvacMode::parse(value) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Invalid mode. Use 'off', 'heat', 'cool' or 'auto'",
        );
    };

    let accepted = {
        let mut climate = state.climate.lock().await;
        climate.set_mode(mode, state.home.as_ref(), monotonic_ms())
    };
    if !accepted {
        return error_response(StatusCode::BAD_REQUEST, "Mode not supported without a cooler");
    }

    publish_state(&state).await;
    handle_get_status(State(state)).await.into_response()
}

async fn handle_set_preset(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(name) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };

    let accepted = {
        let mut climate = state.climate.lock().await;
        climate.set_preset(name, state.home.as_ref(), monotonic_ms())
    };
    if !accepted {
        return error_response(StatusCode::BAD_REQUEST, "Unknown preset");
    }

    publish_state(&state).await;
    handle_get_status(State(state)).await.into_response()
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
