// Copyright 2026 the spm authors. MIT license.

use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum HttpError {
  #[error(transparent)]
  Request(#[from] reqwest::Error),
  #[error("Bad response: {}{}", status, maybe_response_text.as_deref().map(|text| format!("\n\n{text}")).unwrap_or_default())]
  BadStatus {
    status: reqwest::StatusCode,
    maybe_response_text: Option<String>,
  },
  #[error("Redirection from '{url}' did not provide location header")]
  NoLocationHeader { url: Url },
  #[error("Too many redirects.")]
  TooManyRedirects,
}

/// Construct the next uri based on base uri and location header fragment
/// See <https://tools.ietf.org/html/rfc3986#section-4.2>
fn resolve_url_from_location(base_url: &Url, location: &str) -> Url {
  if location.starts_with("http://") || location.starts_with("https://") {
    // absolute uri
    Url::parse(location).expect("provided redirect url should be a valid url")
  } else if location.starts_with("//") {
    // "//" authority path-abempty
    Url::parse(&format!("{}:{}", base_url.scheme(), location))
      .expect("provided redirect url should be a valid url")
  } else if location.starts_with('/') {
    // path-absolute
    base_url
      .join(location)
      .expect("provided redirect url should be a valid url")
  } else {
    // assuming path-noscheme | path-empty
    let base_url_path_str = base_url.path().to_owned();
    // Pop last part or url (after last slash)
    let segs: Vec<&str> = base_url_path_str.rsplitn(2, '/').collect();
    let new_path = format!("{}/{}", segs.last().unwrap_or(&""), location);
    base_url
      .join(&new_path)
      .expect("provided redirect url should be a valid url")
  }
}

fn resolve_redirect_from_response(
  request_url: &Url,
  response: &reqwest::Response,
) -> Result<Url, HttpError> {
  debug_assert!(response.status().is_redirection());
  match response.headers().get(reqwest::header::LOCATION) {
    Some(location) => {
      let location_string = String::from_utf8_lossy(location.as_bytes());
      log::debug!("Redirecting to {:?}...", location_string);
      Ok(resolve_url_from_location(request_url, &location_string))
    }
    None => Err(HttpError::NoLocationHeader {
      url: request_url.clone(),
    }),
  }
}

#[derive(Debug, Clone)]
pub struct HttpClient(reqwest::Client);

impl HttpClient {
  pub fn new() -> Result<Self, HttpError> {
    Ok(Self(
      reqwest::Client::builder()
        .user_agent(concat!("spm/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::none())
        .build()?,
    ))
  }

  /// Do a GET request without following redirects.
  fn get_no_redirect(&self, url: Url) -> reqwest::RequestBuilder {
    self.0.get(url)
  }

  pub async fn download(&self, url: Url) -> Result<Vec<u8>, HttpError> {
    let response = self.get_redirected_response(url).await?;
    if !response.status().is_success() {
      let status = response.status();
      let maybe_response_text =
        response.text().await.ok().filter(|text| !text.is_empty());
      return Err(HttpError::BadStatus {
        status,
        maybe_response_text,
      });
    }
    Ok(response.bytes().await?.into())
  }

  async fn get_redirected_response(
    &self,
    mut url: Url,
  ) -> Result<reqwest::Response, HttpError> {
    let mut response = self.get_no_redirect(url.clone()).send().await?;
    if !response.status().is_redirection() {
      return Ok(response);
    }
    for _ in 0..5 {
      let new_url = resolve_redirect_from_response(&url, &response)?;
      let new_response = self.get_no_redirect(new_url.clone()).send().await?;
      if new_response.status().is_redirection() {
        response = new_response;
        url = new_url;
      } else {
        return Ok(new_response);
      }
    }
    Err(HttpError::TooManyRedirects)
  }
}
