use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::HeaderMap;
use chrono::Duration;

pub const SESSION_COOKIE: &str = "df_session";
pub const REFRESH_COOKIE: &str = "df_refresh";
pub const REFRESH_COOKIE_PATH: &str = "/api/v1/auth";

fn build(name: &str, value: &str, path: &str, max_age: i64, secure: bool) -> String {
    let mut cookie =
        format!("{name}={value}; Path={path}; Max-Age={max_age}; HttpOnly; SameSite=Lax");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

pub fn session_cookie(token: &str, ttl: Duration, secure: bool) -> String {
    build(SESSION_COOKIE, token, "/", ttl.num_seconds(), secure)
}

pub fn refresh_cookie(token: &str, ttl: Duration, secure: bool) -> String {
    build(
        REFRESH_COOKIE,
        token,
        REFRESH_COOKIE_PATH,
        ttl.num_seconds(),
        secure,
    )
}

/// Expires both cookies on the client.
pub fn clear_cookies(secure: bool) -> [String; 2] {
    [
        build(SESSION_COOKIE, "", "/", 0, secure),
        build(REFRESH_COOKIE, "", REFRESH_COOKIE_PATH, 0, secure),
    ]
}

/// Value of the named cookie across every `Cookie` header.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

/// Session token from `Authorization: Bearer`, falling back to the session cookie.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty());
    bearer.or_else(|| read_cookie(headers, SESSION_COOKIE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn session_cookie_is_http_only_and_scoped() {
        let cookie = session_cookie("abc", Duration::minutes(15), true);
        assert_eq!(
            cookie,
            "df_session=abc; Path=/; Max-Age=900; HttpOnly; SameSite=Lax; Secure"
        );
        let refresh = refresh_cookie("xyz", Duration::days(1), false);
        assert!(refresh.contains("Path=/api/v1/auth"));
        assert!(!refresh.contains("Secure"));
    }

    #[test]
    fn bearer_header_wins_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("theme=dark; df_session=from-cookie"));
        assert_eq!(session_token(&headers).as_deref(), Some("from-cookie"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        assert_eq!(session_token(&headers).as_deref(), Some("from-header"));
    }

    #[test]
    fn cleared_cookies_expire_immediately() {
        let [session, refresh] = clear_cookies(false);
        assert!(session.starts_with("df_session=;"));
        assert!(session.contains("Max-Age=0"));
        assert!(refresh.starts_with("df_refresh=;"));
    }
}
