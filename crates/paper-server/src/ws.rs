//! WebSocket transport adapter: auth handshake, reconnect replay, user
//! turns, heartbeats.
//!
//! One long-lived connection per work. A client disconnect never cancels
//! the in-flight task; the supervisor keeps buffering events until a new
//! connection attaches and replays them.

use std::sync::Arc;

use actix_web::{web, HttpRequest, HttpResponse};
use actix_ws::Message;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use paper_agents::{MainAgent, MainAgentConfig, OutputMode, PersistentSink};
use paper_core::AgentError;
use paper_llm::{LlmHandler, LlmRole};
use paper_workspace::Workspace;

use crate::protocol::ServerFrame;
use crate::state::AppState;
use crate::supervisor::WorkPublisher;

pub async fn websocket_entry(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> actix_web::Result<HttpResponse> {
    let work_id = path.into_inner();
    let (response, session, msg_stream) = actix_ws::handle(&req, stream)?;

    actix_web::rt::spawn(run_session(
        session,
        msg_stream,
        work_id,
        state.get_ref().clone(),
    ));
    Ok(response)
}

async fn run_session(
    mut session: actix_ws::Session,
    mut msg_stream: actix_ws::MessageStream,
    work_id: String,
    state: AppState,
) {
    // Auth handshake: exactly one `{token}` frame.
    let Some(auth_text) = next_text(&mut msg_stream).await else {
        return;
    };
    let token = serde_json::from_str::<Value>(&auth_text)
        .ok()
        .and_then(|v| v.get("token").and_then(Value::as_str).map(String::from));

    let Some(token) = token else {
        let _ = session.text(ServerFrame::error("缺少认证token").to_json()).await;
        let _ = session.close(None).await;
        return;
    };
    let Some(user_id) = state.auth.verify(&token) else {
        let _ = session
            .text(ServerFrame::error("无效的认证token").to_json())
            .await;
        let _ = session.close(None).await;
        return;
    };

    let Some(work) = state.works.get(&work_id) else {
        let _ = session
            .text(ServerFrame::error("无权限访问此工作").to_json())
            .await;
        let _ = session.close(None).await;
        return;
    };
    if work.created_by != user_id {
        let _ = session
            .text(ServerFrame::error("无权限访问此工作").to_json())
            .await;
        let _ = session.close(None).await;
        return;
    }

    let _ = session.text(ServerFrame::auth_success().to_json()).await;
    log::info!("[{work_id}] WebSocket连接建立，user_id: {user_id}");

    // All server frames funnel through one channel so replay and live
    // events keep their order. The writer loop ends when either side drops.
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<ServerFrame>();
    let writer = {
        let mut session = session.clone();
        actix_web::rt::spawn(async move {
            while let Some(frame) = frame_rx.recv().await {
                if session.text(frame.to_json()).await.is_err() {
                    break;
                }
            }
        })
    };

    // Reconnect check: attach replays a still-running task's buffer.
    state.supervisor.attach_connection(&work_id, frame_tx.clone());

    while let Some(text) = next_text(&mut msg_stream).await {
        let Ok(message) = serde_json::from_str::<Value>(&text) else {
            let _ = frame_tx.send(ServerFrame::error("消息格式错误"));
            continue;
        };

        if message.get("type").and_then(Value::as_str) == Some("ping") {
            let _ = frame_tx.send(ServerFrame::Pong);
            continue;
        }

        let Some(problem) = message.get("problem").and_then(Value::as_str) else {
            let _ = frame_tx.send(ServerFrame::error("消息格式错误"));
            continue;
        };

        // Exactly-one-active-task rule, enforced before anything starts.
        let (task_id, cancel) =
            match state.supervisor.create_task(&work_id, user_id, problem) {
                Ok(created) => created,
                Err(e) => {
                    let _ = frame_tx.send(ServerFrame::error(e.to_string()));
                    continue;
                }
            };
        log::info!("[{work_id}] 开始处理用户问题，task_id: {task_id}");

        let _ = frame_tx.send(ServerFrame::start());
        run_turn(&state, &work_id, user_id, &work, problem, cancel, &frame_tx).await;
    }

    state.supervisor.detach_connection(&work_id, &frame_tx);
    drop(frame_tx);
    let _ = writer.await;
}

/// Execute one user turn to a terminal task state.
async fn run_turn(
    state: &AppState,
    work_id: &str,
    user_id: i64,
    work: &crate::auth::WorkMeta,
    problem: &str,
    cancel: CancellationToken,
    frame_tx: &mpsc::UnboundedSender<ServerFrame>,
) {
    let mut agent = match build_agent(state, work_id, user_id, work, cancel.clone()).await {
        Ok(agent) => agent,
        Err(message) => {
            log::error!("[{work_id}] {message}");
            let _ = frame_tx.send(ServerFrame::error(message.clone()));
            let _ = state.supervisor.start_task(work_id);
            let _ = state.supervisor.fail_task(work_id, &message);
            return;
        }
    };

    if state.supervisor.start_task(work_id).is_err() {
        return;
    }
    agent.load_history().await;

    match tokio::time::timeout(state.task_timeout, agent.run(problem)).await {
        Ok(Ok(_)) => {
            let _ = state.supervisor.complete_task(work_id);
            let _ = frame_tx.send(ServerFrame::complete());
            log::info!("[{work_id}] AI处理完成");
        }
        Ok(Err(AgentError::Cancelled)) => {
            // cancel_task already marked the record.
            log::info!("[{work_id}] AI任务被取消");
        }
        Ok(Err(e)) => {
            let message = format!("AI处理失败: {e}");
            log::error!("[{work_id}] {message}");
            let _ = state.supervisor.fail_task(work_id, &message);
            let _ = frame_tx.send(ServerFrame::error(message));
        }
        Err(_elapsed) => {
            log::error!("[{work_id}] AI任务执行超时");
            cancel.cancel();
            let _ = state.supervisor.fail_task(work_id, "任务执行超时");
            let _ = frame_tx.send(ServerFrame::error("AI任务执行超时，请重试"));
        }
    }
}

async fn build_agent(
    state: &AppState,
    work_id: &str,
    user_id: i64,
    work: &crate::auth::WorkMeta,
    cancel: CancellationToken,
) -> Result<MainAgent, String> {
    let brain_config = state
        .configs
        .require(user_id, LlmRole::Brain)
        .map_err(|e| e.to_string())?;
    let brain = LlmHandler::from_config(&brain_config);

    // The code role falls back to the brain model; the writer role is
    // offered only when configured.
    let code = match state.configs.require(user_id, LlmRole::Code) {
        Ok(config) => LlmHandler::from_config(&config),
        Err(_) => {
            log::info!("[{work_id}] 未提供code配置，CodeAgent使用主模型");
            brain.clone()
        }
    };
    let writer = state
        .configs
        .require(user_id, LlmRole::Writing)
        .ok()
        .map(|config| LlmHandler::from_config(&config));

    let workspace = Workspace::create(&state.workspaces_root, work_id)
        .await
        .map_err(|e| format!("工作空间初始化失败: {e}"))?;

    let publisher = Arc::new(WorkPublisher::new(state.supervisor.clone(), work_id));
    let sink = Arc::new(PersistentSink::new(
        work_id,
        publisher,
        state.chat_store.clone(),
    ));

    Ok(MainAgent::new(
        MainAgentConfig {
            work_id: work_id.to_string(),
            template_id: work.template_id,
            output_mode: OutputMode::parse(&work.output_mode),
            templates_dir: state.templates_root.clone(),
        },
        brain,
        code,
        writer,
        workspace,
        state.chat_store.clone(),
        sink,
        cancel,
    ))
}

/// Next text payload; non-text frames are skipped, close ends the stream.
async fn next_text(msg_stream: &mut actix_ws::MessageStream) -> Option<String> {
    while let Some(message) = msg_stream.next().await {
        match message {
            Ok(Message::Text(text)) => return Some(text.to_string()),
            Ok(Message::Close(_)) => return None,
            Ok(_) => continue,
            Err(e) => {
                log::debug!("WebSocket协议错误: {e}");
                return None;
            }
        }
    }
    None
}
