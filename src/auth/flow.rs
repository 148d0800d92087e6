use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};

use log::{debug, info, warn};
use oauth2::basic::{BasicClient, BasicErrorResponse, BasicTokenResponse};
use oauth2::reqwest::http_client;
use oauth2::url::Url;
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    RedirectUrl, RefreshToken, RequestTokenError, Scope, TokenResponse, TokenUrl,
};

use super::{unix_now, ApplicationSecret, AuthError, StoredToken};
use crate::config::AuthConfig;

const SUCCESS_PAGE: &str = "<html><body><h1>Authentication complete</h1>\
    <p>You may close this window and return to the terminal.</p></body></html>";
const FAILURE_PAGE: &str = "<html><body><h1>Authentication failed</h1>\
    <p>Check the terminal for details.</p></body></html>";

/// Failure of a request to the token endpoint.
pub type TokenRequestError =
    RequestTokenError<oauth2::reqwest::Error<reqwest::Error>, BasicErrorResponse>;

impl From<TokenRequestError> for AuthError {
    fn from(err: TokenRequestError) -> Self {
        let detail = match err {
            RequestTokenError::ServerResponse(response) => response.to_string(),
            RequestTokenError::Request(e) => e.to_string(),
            RequestTokenError::Parse(e, body) => {
                format!("{e}: {}", String::from_utf8_lossy(&body))
            }
            RequestTokenError::Other(msg) => msg,
        };
        AuthError::Token(detail)
    }
}

/// OAuth client for the credentials in `secret`.
///
/// Google expects the client secret in the form body rather than in a basic
/// auth header, and installed apps may have no secret at all.
pub fn oauth_client(secret: &ApplicationSecret) -> Result<BasicClient, AuthError> {
    let auth_url =
        AuthUrl::new(secret.auth_uri.clone()).map_err(|e| AuthError::InvalidUri(e.to_string()))?;
    let token_url =
        TokenUrl::new(secret.token_uri.clone()).map_err(|e| AuthError::InvalidUri(e.to_string()))?;
    let client_secret =
        Some(secret.client_secret.clone()).filter(|s| !s.is_empty()).map(ClientSecret::new);

    Ok(BasicClient::new(
        ClientId::new(secret.client_id.clone()),
        client_secret,
        auth_url,
        Some(token_url),
    )
    .set_auth_type(AuthType::RequestBody))
}

/// The consent page URL and the CSRF state it carries.
pub fn consent_url(
    client: &BasicClient,
    scopes: &[&str],
    challenge: PkceCodeChallenge,
) -> (Url, CsrfToken) {
    client
        .authorize_url(CsrfToken::new_random)
        .add_scopes(scopes.iter().map(|s| Scope::new(s.to_string())))
        .add_extra_param("access_type", "offline")
        .add_extra_param("prompt", "consent")
        .set_pkce_challenge(challenge)
        .url()
}

/// Query parameters carried by a redirect back to the local listener.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Parse the request line of a callback, e.g. `GET /?code=..&state=.. HTTP/1.1`.
pub fn parse_callback_request(request_line: &str) -> Option<CallbackParams> {
    let mut words = request_line.split_whitespace();
    if words.next()? != "GET" {
        return None;
    }
    let target = words.next()?;
    let url = Url::parse(&format!("http://localhost{target}")).ok()?;

    let mut params = CallbackParams::default();
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => params.code = Some(value.into_owned()),
            "state" => params.state = Some(value.into_owned()),
            "error" => params.error = Some(value.into_owned()),
            _ => {}
        }
    }
    Some(params)
}

fn respond(mut stream: &TcpStream, status: &str, body: &str) -> io::Result<()> {
    write!(
        stream,
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )?;
    stream.flush()
}

fn read_request_line(stream: &TcpStream) -> io::Result<String> {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;

    // Drain the headers so closing the socket does not reset the connection.
    let mut header = String::new();
    loop {
        header.clear();
        if reader.read_line(&mut header)? == 0 || header == "\r\n" || header == "\n" {
            break;
        }
    }
    Ok(request_line)
}

/// Accept connections on `listener` until one delivers an authorization code.
///
/// Requests without a code or error (a browser asking for `/favicon.ico`)
/// get a 404 and are ignored.
pub fn wait_for_code(listener: &TcpListener, expected_state: &str) -> Result<String, AuthError> {
    for stream in listener.incoming() {
        let stream = stream?;
        let request_line = read_request_line(&stream)?;
        debug!("callback request: {}", request_line.trim_end());

        let Some(params) = parse_callback_request(&request_line) else {
            respond(&stream, "400 Bad Request", FAILURE_PAGE)?;
            continue;
        };

        if let Some(error) = params.error {
            respond(&stream, "200 OK", FAILURE_PAGE)?;
            return Err(AuthError::Denied(error));
        }

        let Some(code) = params.code else {
            respond(&stream, "404 Not Found", "")?;
            continue;
        };

        if params.state.as_deref() != Some(expected_state) {
            respond(&stream, "400 Bad Request", FAILURE_PAGE)?;
            return Err(AuthError::StateMismatch);
        }

        respond(&stream, "200 OK", SUCCESS_PAGE)?;
        return Ok(code);
    }
    Err(AuthError::Callback(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "callback listener closed",
    )))
}

fn stored_token(response: &BasicTokenResponse, previous_refresh: Option<&str>) -> StoredToken {
    StoredToken {
        access_token: response.access_token().secret().clone(),
        refresh_token: response
            .refresh_token()
            .map(|t| t.secret().clone())
            .or_else(|| previous_refresh.map(str::to_string)),
        expires_at: response.expires_in().map(|d| unix_now() + d.as_secs()),
    }
}

/// Obtain a new access token from a refresh token.
///
/// Google usually omits the refresh token from the reply, so the one passed
/// in is kept.
pub fn refresh(secret: &ApplicationSecret, refresh_token: &str) -> Result<StoredToken, AuthError> {
    let response = oauth_client(secret)?
        .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
        .request(http_client)?;
    Ok(stored_token(&response, Some(refresh_token)))
}

/// Run the installed-app consent flow end to end.
pub fn run_installed_flow(
    secret: &ApplicationSecret,
    scopes: &[&str],
    cfg: &AuthConfig,
) -> Result<StoredToken, AuthError> {
    let listener = TcpListener::bind(("127.0.0.1", cfg.callback_port)).map_err(|source| {
        AuthError::Bind {
            port: cfg.callback_port,
            source,
        }
    })?;
    let port = listener.local_addr()?.port();
    let redirect = format!("http://127.0.0.1:{port}/");
    let redirect_uri =
        RedirectUrl::new(redirect.clone()).map_err(|e| AuthError::InvalidUri(e.to_string()))?;
    let client = oauth_client(secret)?.set_redirect_uri(redirect_uri);

    let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
    let (url, state) = consent_url(&client, scopes, challenge);

    if !cfg.open_browser {
        println!("Please visit this URL to authorize this application:\n{url}");
    } else if let Err(e) = open::that(url.as_str()) {
        warn!("could not open a browser ({e})");
        println!("Please visit this URL to authorize this application:\n{url}");
    } else {
        info!("waiting for authorization on {redirect}");
    }

    let code = wait_for_code(&listener, state.secret())?;
    info!("authorization code received, requesting tokens");
    let response = client
        .exchange_code(AuthorizationCode::new(code))
        .set_pkce_verifier(verifier)
        .request(http_client)?;
    Ok(stored_token(&response, None))
}
