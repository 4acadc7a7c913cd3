//! Dialflow Core server entrypoint.
//!
//! Starts three concurrent listeners: the admin HTTP/WS control surface, the
//! telephony media-stream socket, and the peer-connection signaling socket.
//! Concrete LLM/STT/TTS/Calendar/Search engines are an integration point
//! left to the embedding application (only their contracts live in this
//! crate); this binary wires narrating stand-ins that fail loudly so the
//! turn loop's existing error-recovery paths (error event + safe fallback
//! line) carry a clear, traceable signal until real engines are wired in.

use std::net::SocketAddr;
use std::sync::Arc;

use dialflow_core::admin::{self, AppState};
use dialflow_core::channel::telephony::TelephonyChannel;
use dialflow_core::channel::webrtc::WebRtcChannel;
use dialflow_core::channel::Channel;
use dialflow_core::config::Config;
use dialflow_core::debug::DebugBroadcaster;
use dialflow_core::external::{
    Calendar, CalendarEvent, CalendarEventHandle, CalendarSlot, ExternalError, IceCredentials,
    IceServer, Llm, Search, SearchResult, SttResult, Stt, Tts, TtsAudio, TurnMessage,
};
use dialflow_core::external::twilio_turn::TwilioIceCredentials;
use dialflow_core::session::Session;
use dialflow_core::tools::builtin::{ApartmentSearchTool, CheckAvailabilityTool, CreateBookingTool};
use dialflow_core::tools::ToolRegistry;
use dialflow_core::turn_controller::TurnController;
use dialflow_core::workflow::loader::load_workflows_dir;
use dialflow_core::workflow::Workflow;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn, Level};

struct UnconfiguredLlm;

#[async_trait]
impl Llm for UnconfiguredLlm {
    async fn complete(
        &self,
        _system_prompt: &str,
        _history: &[TurnMessage],
        provider: &str,
        _model: &str,
    ) -> Result<String, ExternalError> {
        Err(ExternalError::Llm(format!(
            "no LLM engine wired in for provider '{provider}'; supply a concrete Llm implementation"
        )))
    }
}

struct UnconfiguredStt;

#[async_trait]
impl Stt for UnconfiguredStt {
    async fn transcribe(&self, _pcm16: &[i16], _sample_rate: u32) -> Result<SttResult, ExternalError> {
        Err(ExternalError::Stt("no STT engine wired in".to_string()))
    }
}

struct UnconfiguredTts;

#[async_trait]
impl Tts for UnconfiguredTts {
    async fn synthesize(&self, _text: &str, _voice_id: &str) -> Result<TtsAudio, ExternalError> {
        Err(ExternalError::Tts("no TTS engine wired in".to_string()))
    }
}

struct UnconfiguredSearch;

#[async_trait]
impl Search for UnconfiguredSearch {
    async fn query(&self, _text: &str, _top_k: u32) -> Result<Vec<SearchResult>, ExternalError> {
        Err(ExternalError::Search("no search service configured (set SEARCH_SERVICE_URL)".to_string()))
    }
}

struct UnconfiguredCalendar;

#[async_trait]
impl Calendar for UnconfiguredCalendar {
    async fn list_available_slots(
        &self,
        _calendar_id: &str,
        _start: chrono::DateTime<chrono::Utc>,
        _end: chrono::DateTime<chrono::Utc>,
        _min_duration_minutes: i64,
    ) -> Result<Vec<CalendarSlot>, ExternalError> {
        Err(ExternalError::Calendar("no calendar backend configured (set CALENDAR_ID)".to_string()))
    }

    async fn create_event(&self, _event: CalendarEvent) -> Result<CalendarEventHandle, ExternalError> {
        Err(ExternalError::Calendar("no calendar backend configured (set CALENDAR_ID)".to_string()))
    }

    async fn cancel_event(&self, _calendar_id: &str, _event_id: &str) -> Result<(), ExternalError> {
        Err(ExternalError::Calendar("no calendar backend configured (set CALENDAR_ID)".to_string()))
    }
}

fn build_tool_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(ApartmentSearchTool::new(Arc::new(UnconfiguredSearch))));
    registry.register(Arc::new(CheckAvailabilityTool::new(Arc::new(UnconfiguredCalendar), "primary".to_string())));
    registry.register(Arc::new(CreateBookingTool::new(Arc::new(UnconfiguredCalendar), "primary".to_string())));
    registry
}

fn load_fallback_ice_servers(config: &Config) -> Vec<IceServer> {
    let Some(raw) = &config.ice_servers_fallback_json else { return Vec::new() };
    match serde_json::from_str(raw) {
        Ok(servers) => servers,
        Err(e) => {
            warn!("ICE_SERVERS_FALLBACK_JSON did not parse: {e}");
            Vec::new()
        }
    }
}

fn new_session(
    state: &AppState,
    session_id: String,
    workflow: Arc<Workflow>,
    tools: Arc<ToolRegistry>,
    llm: Arc<dyn Llm>,
    provider: &str,
    model: &str,
) -> Arc<Session> {
    let broadcaster = state.broadcasters.get_or_create(&session_id);
    let session = Arc::new(Session::new(session_id.clone(), workflow, tools, llm, provider, model, broadcaster));
    state.sessions.insert(session_id, session.clone());
    session
}

async fn run_telephony_listener(addr: SocketAddr, state: AppState, default_workflow: Option<Arc<Workflow>>, tools: Arc<ToolRegistry>, llm: Arc<dyn Llm>, config: Arc<Config>) {
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("failed to bind telephony listener on {addr}: {e}");
            return;
        }
    };
    info!("telephony media-stream listener on {addr}");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("telephony accept error: {e}");
                continue;
            }
        };
        let Some(workflow) = default_workflow.clone() else {
            warn!("rejecting telephony connection from {peer}: no workflow loaded");
            continue;
        };
        let state = state.clone();
        let tools = tools.clone();
        let llm = llm.clone();
        let config = config.clone();
        tokio::spawn(async move {
            let ws = match tokio_tungstenite::accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!("telephony websocket handshake failed for {peer}: {e}");
                    return;
                }
            };
            let channel = match TelephonyChannel::accept(ws).await {
                Ok(c) => c,
                Err(e) => {
                    warn!("telephony handshake failed for {peer}: {e}");
                    return;
                }
            };
            let session_id = uuid::Uuid::new_v4().to_string();
            let session = new_session(&state, session_id, workflow, tools, llm, &config.llm_provider, &config.model);
            let controller = TurnController::new(
                Box::new(channel),
                Arc::new(UnconfiguredStt),
                Arc::new(UnconfiguredTts),
                session.clone(),
                config.tts_voice.clone(),
                Arc::new(std::sync::atomic::AtomicBool::new(false)),
            );
            controller.run().await;
            state.sessions.remove(session.session_id());
            state.broadcasters.remove(session.session_id());
        });
    }
}

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SignalingInbound {
    Hello,
    WebrtcOffer { sdp: String },
    Hangup,
    Ping,
}

#[derive(serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SignalingOutbound {
    HelloAck { ice_servers: Vec<IceServer> },
    WebrtcAnswer { sdp: String },
    Pong,
    Error { message: String },
}

async fn run_webrtc_listener(
    addr: SocketAddr,
    state: AppState,
    default_workflow: Option<Arc<Workflow>>,
    tools: Arc<ToolRegistry>,
    llm: Arc<dyn Llm>,
    config: Arc<Config>,
    ice_credentials: Arc<dyn IceCredentials>,
) {
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("failed to bind webrtc signaling listener on {addr}: {e}");
            return;
        }
    };
    info!("peer-connection signaling listener on {addr}");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("webrtc signaling accept error: {e}");
                continue;
            }
        };
        let state = state.clone();
        let workflow = default_workflow.clone();
        let tools = tools.clone();
        let llm = llm.clone();
        let config = config.clone();
        let ice_credentials = ice_credentials.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_signaling_connection(stream, peer, state, workflow, tools, llm, config, ice_credentials).await {
                warn!("webrtc signaling session with {peer} ended: {e}");
            }
        });
    }
}

async fn handle_signaling_connection(
    stream: tokio::net::TcpStream,
    peer: SocketAddr,
    state: AppState,
    default_workflow: Option<Arc<Workflow>>,
    tools: Arc<ToolRegistry>,
    llm: Arc<dyn Llm>,
    config: Arc<Config>,
    ice_credentials: Arc<dyn IceCredentials>,
) -> Result<(), String> {
    use futures_util::{SinkExt, StreamExt};

    let mut ws = tokio_tungstenite::accept_async(stream).await.map_err(|e| e.to_string())?;

    while let Some(msg) = ws.next().await {
        let msg = msg.map_err(|e| e.to_string())?;
        let Message::Text(text) = msg else { continue };
        let Ok(inbound) = serde_json::from_str::<SignalingInbound>(&text) else { continue };

        let outbound = match inbound {
            SignalingInbound::Hello => {
                let mut ice_servers = ice_credentials.fetch().await;
                if ice_servers.is_empty() {
                    ice_servers = load_fallback_ice_servers(&config);
                }
                SignalingOutbound::HelloAck { ice_servers }
            }
            SignalingInbound::Ping => SignalingOutbound::Pong,
            SignalingInbound::Hangup => break,
            SignalingInbound::WebrtcOffer { sdp } => match default_workflow.clone() {
                Some(workflow) => {
                    spawn_webrtc_call(&state, workflow, tools.clone(), llm.clone(), &config, peer);
                    // Real SDP negotiation happens in the external media
                    // engine this signaling socket hands off to (the
                    // peer-connection adapter here is media-path only); this
                    // answer is a loopback placeholder for that handoff.
                    SignalingOutbound::WebrtcAnswer { sdp }
                }
                None => SignalingOutbound::Error { message: "no workflow loaded".to_string() },
            },
        };

        let text = serde_json::to_string(&outbound).map_err(|e| e.to_string())?;
        ws.send(Message::Text(text)).await.map_err(|e| e.to_string())?;
    }

    Ok(())
}

fn spawn_webrtc_call(
    state: &AppState,
    workflow: Arc<Workflow>,
    tools: Arc<ToolRegistry>,
    llm: Arc<dyn Llm>,
    config: &Arc<Config>,
    peer: SocketAddr,
) {
    let session_id = uuid::Uuid::new_v4().to_string();
    let (channel, _media_handle) = WebRtcChannel::new(Some(peer.to_string()), Some(session_id.clone()));
    let session = new_session(state, session_id, workflow, tools, llm, &config.llm_provider, &config.model);
    let state = state.clone();
    let config = config.clone();
    tokio::spawn(async move {
        let controller = TurnController::new(
            Box::new(channel),
            Arc::new(UnconfiguredStt),
            Arc::new(UnconfiguredTts),
            session.clone(),
            config.tts_voice.clone(),
            Arc::new(std::sync::atomic::AtomicBool::new(false)),
        );
        controller.run().await;
        state.sessions.remove(session.session_id());
        state.broadcasters.remove(session.session_id());
    });
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = Arc::new(Config::from_env()?);
    info!("dialflow-core starting, provider={} model={}", config.llm_provider, config.model);

    let workflows = load_workflows_dir(&config.workflow_dir);
    if workflows.is_empty() {
        warn!("no workflows loaded from {}; calls will be rejected until one is added", config.workflow_dir);
    }

    let admin_token = config.admin_api_key.as_deref();
    let app_state = AppState::new(std::path::PathBuf::from(&config.workflow_dir), admin_token, config.debug_flag);
    let default_workflow = workflows.first().cloned().map(Arc::new);
    for workflow in workflows {
        app_state.workflows.insert(workflow.id.clone(), Arc::new(workflow));
    }

    let tools = Arc::new(build_tool_registry());
    let llm: Arc<dyn Llm> = Arc::new(UnconfiguredLlm);
    let ice_credentials: Arc<dyn IceCredentials> = Arc::new(TwilioIceCredentials::new(
        config.telephony_account_sid.clone(),
        config.telephony_auth_token.clone(),
    ));

    let admin_addr: SocketAddr = format!("{}:{}", config.host, config.admin_port).parse()?;
    let admin_listener = TcpListener::bind(admin_addr).await?;
    info!("admin surface on {admin_addr}");
    let admin_router = admin::router(app_state.clone());
    let admin_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(admin_listener, admin_router).await {
            error!("admin server error: {e}");
        }
    });

    let telephony_addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let telephony_task = tokio::spawn(run_telephony_listener(
        telephony_addr,
        app_state.clone(),
        default_workflow.clone(),
        tools.clone(),
        llm.clone(),
        config.clone(),
    ));

    let webrtc_addr: SocketAddr = format!("{}:{}", config.host, config.webrtc_port).parse()?;
    let webrtc_task = tokio::spawn(run_webrtc_listener(
        webrtc_addr,
        app_state.clone(),
        default_workflow,
        tools,
        llm,
        config,
        ice_credentials,
    ));

    let _ = tokio::join!(admin_task, telephony_task, webrtc_task);
    Ok(())
}
