//! 调用方身份与请求体提取
//!
//! 身份由前置的身份提供方通过请求头声明：`x-auth-uid` 为用户 id，
//! `x-auth-admin: true` 为管理员声明。身份检查先于请求体解析执行。

use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Request},
    http::request::Parts,
    Json,
};
use serde::de::DeserializeOwned;

use super::error::ApiError;
use super::AppState;
use crate::utils::QuizError;

pub const UID_HEADER: &str = "x-auth-uid";
pub const ADMIN_HEADER: &str = "x-auth-admin";
pub const EVENT_TOKEN_HEADER: &str = "x-event-token";

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// 已认证的调用方
#[derive(Debug, Clone)]
pub struct Caller {
    pub uid: String,
    pub is_admin: bool,
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let uid = header(parts, UID_HEADER).ok_or(QuizError::Unauthenticated)?;
        let is_admin = header(parts, ADMIN_HEADER).is_some_and(|v| v.eq_ignore_ascii_case("true"));
        Ok(Caller {
            uid: uid.to_string(),
            is_admin,
        })
    }
}

/// 带管理员声明的调用方
#[derive(Debug, Clone)]
pub struct Admin(pub Caller);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Admin {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let caller = Caller::from_request_parts(parts, state).await?;
        if !caller.is_admin {
            return Err(QuizError::PermissionDenied.into());
        }
        Ok(Admin(caller))
    }
}

/// 对象存储事件投递方，凭共享令牌识别
#[derive(Debug, Clone, Copy)]
pub struct EventSource;

#[async_trait]
impl FromRequestParts<AppState> for EventSource {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match header(parts, EVENT_TOKEN_HEADER) {
            Some(token) if token == state.config.server.event_token => Ok(EventSource),
            _ => Err(QuizError::Unauthenticated.into()),
        }
    }
}

/// JSON 请求体；解析失败统一映射为 `INVALID_ARGUMENT`
#[derive(Debug, Clone)]
pub struct RpcJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for RpcJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| ApiError(QuizError::invalid(rejection.body_text())))?;
        Ok(RpcJson(value))
    }
}
