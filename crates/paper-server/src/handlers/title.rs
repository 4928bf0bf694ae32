//! One-shot academic title generation from the user's first question.
//!
//! Uses the non-streaming LLM path; on failure the question itself becomes
//! the fallback title.

use actix_web::{web, HttpRequest, HttpResponse, Responder};
use serde::Deserialize;

use paper_core::Message;
use paper_llm::{LlmHandler, LlmRole};

use crate::handlers::authorize;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TitleRequest {
    #[serde(default)]
    pub question: String,
}

pub async fn generate(
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<TitleRequest>,
    state: web::Data<AppState>,
) -> impl Responder {
    let work_id = path.into_inner();
    let user_id = match authorize(&req, &state, &work_id) {
        Ok(user_id) => user_id,
        Err(response) => return response,
    };

    let question = body.question.trim();
    if question.is_empty() {
        return HttpResponse::BadRequest().json(serde_json::json!({"detail": "缺少问题内容"}));
    }

    let config = match state.configs.require(user_id, LlmRole::Brain) {
        Ok(config) => config,
        Err(e) => {
            return HttpResponse::InternalServerError()
                .json(serde_json::json!({"detail": e.to_string()}))
        }
    };

    let prompt = format!(
        "请根据用户的研究问题生成一个简洁、专业的学术论文标题。\n\
         要求：\n\
         1. 标题要准确反映研究内容\n\
         2. 使用学术化的表达\n\
         3. 长度精简，不超过15个字符\n\
         4. 只返回标题，不要其他内容\n\n\
         用户问题：{question}\n\n\
         请生成标题："
    );

    let handler = LlmHandler::from_config(&config);
    let (response, _calls) = handler.process_sync(&[Message::user(prompt)], &[]).await;

    let title = response
        .content
        .trim()
        .trim_matches(['"', '\''])
        .trim()
        .to_string();

    let (title, status) = if title.is_empty() || title.contains("LLM API调用失败") {
        (fallback_title(question), "fallback")
    } else {
        (title, "success")
    };

    HttpResponse::Ok().json(serde_json::json!({
        "title": title,
        "status": status,
        "message": "标题生成成功",
    }))
}

fn fallback_title(question: &str) -> String {
    question.chars().take(50).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_truncates_long_questions() {
        let question = "研".repeat(80);
        assert_eq!(fallback_title(&question).chars().count(), 50);
        assert_eq!(fallback_title("短问题"), "短问题");
    }
}
