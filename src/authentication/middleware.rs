use std::sync::Arc;

use warp::{reject::{self, Rejection}, Filter};

use super::jwt::{verify_jwt_session, SessionData};

#[derive(Debug)]
struct Unauthorized;

impl reject::Reject for Unauthorized {}

/// Extracts the token from `Authorization: Token <token>` or `Bearer <token>`.
pub fn parse_authorization_header(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();

    if token.is_empty() {
        return None;
    }
    if scheme.eq_ignore_ascii_case("token") || scheme.eq_ignore_ascii_case("bearer") {
        Some(token)
    } else {
        None
    }
}

fn session_from_header(header: Option<String>, secret: &str) -> Option<SessionData> {
    let header = header?;
    let token = parse_authorization_header(&header)?;

    verify_jwt_session(token, secret).ok().map(SessionData::from)
}

pub fn with_session(
    secret: Arc<str>,
) -> impl Filter<Extract = (SessionData,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization").and_then(move |header: Option<String>| {
        let secret = secret.clone();
        async move {
            match session_from_header(header, &secret) {
                Some(session) => Ok(session),
                None => Err(warp::reject::custom(Unauthorized)),
            }
        }
    })
}

pub fn with_possible_session(
    secret: Arc<str>,
) -> impl Filter<Extract = (Option<SessionData>,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .map(move |header: Option<String>| session_from_header(header, &secret))
}
