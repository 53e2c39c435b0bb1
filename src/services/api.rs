use anyhow::Result;
use reqwest::{Client, Response};

use crate::models::{
    ChatRequest, ChatSession, DebateCreateRequest, DebateMessage, DebateMessagesResponse,
    DebateSession, DebateTurnRequest, FilesResponse, HistoryResponse, Model, ModelsResponse,
    SearchResponse, SessionsResponse, UserFile, UserInfo, UsersResponse,
};

/// Thin client over the chat server's HTTP API. Streaming endpoints return
/// the raw `reqwest::Response` so the caller can decide between
/// `.bytes_stream()` and `.json()`.
#[derive(Clone, PartialEq)]
pub struct ApiService {
    base_url: String,
}

impl ApiService {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // Chat

    pub async fn send_message(&self, request: &ChatRequest) -> Result<Response> {
        let resp = Client::new()
            .post(self.url("/api/chat"))
            .json(request)
            .send()
            .await?;
        Ok(resp)
    }

    pub async fn get_chat_history(
        &self,
        user_id: i64,
        session_id: Option<&str>,
    ) -> Result<HistoryResponse> {
        let mut req = Client::new().get(self.url(&format!("/api/chat/history/{user_id}")));
        if let Some(sid) = session_id {
            req = req.query(&[("session_id", sid)]);
        }
        Ok(req.send().await?.json().await?)
    }

    pub async fn get_chat_sessions(&self, user_id: i64) -> Result<Vec<ChatSession>> {
        let resp: SessionsResponse = Client::new()
            .get(self.url(&format!("/api/chat/sessions/{user_id}")))
            .send()
            .await?
            .json()
            .await?;
        Ok(resp.sessions)
    }

    pub async fn search_chat_history(&self, user_id: i64, query: &str) -> Result<Vec<ChatSession>> {
        let resp: SearchResponse = Client::new()
            .get(self.url(&format!("/api/chat/search/{user_id}")))
            .query(&[("q", query.trim())])
            .send()
            .await?
            .json()
            .await?;
        Ok(resp.results)
    }

    pub async fn get_user_files(&self, user_id: i64) -> Result<Vec<UserFile>> {
        let resp: FilesResponse = Client::new()
            .get(self.url(&format!("/api/chat/files/{user_id}")))
            .send()
            .await?
            .json()
            .await?;
        Ok(resp.files)
    }

    // Users

    pub async fn get_users(&self) -> Result<Vec<UserInfo>> {
        let resp: UsersResponse = Client::new()
            .get(self.url("/api/users"))
            .send()
            .await?
            .json()
            .await?;
        Ok(resp.users)
    }

    pub async fn create_user(&self, username: &str) -> Result<UserInfo> {
        let resp = Client::new()
            .post(self.url("/api/users"))
            .json(&serde_json::json!({ "username": username }))
            .send()
            .await?
            .json()
            .await?;
        Ok(resp)
    }

    // Model registry

    pub async fn get_models(&self) -> Result<Vec<Model>> {
        let resp: ModelsResponse = Client::new()
            .get(self.url("/api/models"))
            .send()
            .await?
            .json()
            .await?;
        Ok(resp.models)
    }

    /// Streamed download-progress feed; see `download::run_pull`.
    pub async fn pull_model(&self, model_name: &str) -> Result<Response> {
        let resp = Client::new()
            .get(self.url(&format!("/api/models/pull/{model_name}")))
            .send()
            .await?;
        Ok(resp)
    }

    pub async fn delete_model(&self, model_name: &str) -> Result<()> {
        Client::new()
            .delete(self.url(&format!("/api/models/{model_name}")))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    // Debates

    pub async fn create_debate(&self, request: &DebateCreateRequest) -> Result<DebateSession> {
        Ok(Client::new()
            .post(self.url("/api/debates"))
            .json(request)
            .send()
            .await?
            .json()
            .await?)
    }

    pub async fn get_debate(&self, debate_id: i64) -> Result<DebateSession> {
        Ok(Client::new()
            .get(self.url(&format!("/api/debates/{debate_id}")))
            .send()
            .await?
            .json()
            .await?)
    }

    pub async fn get_debate_messages(
        &self,
        debate_id: i64,
        round_number: Option<u32>,
    ) -> Result<Vec<DebateMessage>> {
        let mut req = Client::new().get(self.url(&format!("/api/debates/{debate_id}/messages")));
        if let Some(round) = round_number {
            req = req.query(&[("round", round)]);
        }
        let resp: DebateMessagesResponse = req.send().await?.json().await?;
        Ok(resp.messages)
    }

    /// Same streaming event shape as `send_message`, parameterized by
    /// participant, round and turn.
    pub async fn send_debate_turn(&self, request: &DebateTurnRequest) -> Result<Response> {
        let resp = Client::new()
            .post(self.url("/api/debates/turn"))
            .json(request)
            .send()
            .await?;
        Ok(resp)
    }

    pub async fn complete_debate(&self, debate_id: i64) -> Result<()> {
        Client::new()
            .post(self.url(&format!("/api/debates/{debate_id}/complete")))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let api = ApiService::new("http://localhost:8000/");
        assert_eq!(api.url("/api/models"), "http://localhost:8000/api/models");
    }
}
