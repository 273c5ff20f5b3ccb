//! HTTPエクスチェンジの取得ヘルパー
//!
//! リクエスト/レスポンスからボディ・ヘッダをテキストとして取り出す。
//! ボディは 1 MiB までしか保持せず、テキストでないものやデコードできないものは
//! プレースホルダに置き換える（エラーにはしない）。

use axum::extract::ConnectInfo;
use axum::http::header::CONTENT_TYPE;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use bytes::Bytes;
use encoding_rs::{Encoding, UTF_8};
use mime_guess::mime::{self, Mime};
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use tracing::debug;

/// 取得するボディの上限バイト数
pub const MAX_CAPTURE_BYTES: usize = 1 << 20;

/// テキスト以外のボディの代替文字列
pub const BINARY_PLACEHOLDER: &str = "<binary content>";

/// デコードできなかったボディの代替文字列
pub const UNDECODABLE_PLACEHOLDER: &str = "<undecodable content>";

const NAME_SEPARATOR: &str = ":";
const VALUE_SEPARATOR: &str = ",";
const PAIR_SEPARATOR: &str = "\n";

/// ヘッダとボディを読み取れるHTTPメッセージ
pub trait HttpExchange {
    /// ヘッダ
    fn headers(&self) -> &HeaderMap;

    /// バッファ済みボディ
    fn body(&self) -> &[u8];

    /// ボディが `MAX_CAPTURE_BYTES` で切り詰められたか
    fn is_truncated(&self) -> bool;
}

/// 取得済みリクエスト
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    /// HTTPメソッド
    pub method: Method,
    /// リクエストURL（サーバー側はパス＋クエリ、クライアント側は絶対URL）
    pub url: String,
    /// ヘッダ
    pub headers: HeaderMap,
    /// ボディ（先頭 `MAX_CAPTURE_BYTES` まで）
    pub body: Bytes,
    /// 元のボディが上限を超えて切り詰められたか
    pub body_truncated: bool,
    /// 接続元ホスト
    pub remote_host: Option<String>,
}

impl CapturedRequest {
    /// ヘッダ・ボディ無しのリクエストを作成
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            body_truncated: false,
            remote_host: None,
        }
    }

    /// axumのリクエストパーツから作成
    ///
    /// 接続元は `ConnectInfo<SocketAddr>` 拡張があればそこから取得する。
    pub fn from_parts(parts: &Parts, body: Bytes) -> Self {
        let (body, body_truncated) = cap(body);
        let remote_host = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| normalize_ip(addr.ip()).to_string());

        Self {
            method: parts.method.clone(),
            url: parts.uri.to_string(),
            headers: parts.headers.clone(),
            body,
            body_truncated,
            remote_host,
        }
    }

    /// 送信前のreqwestリクエストから作成
    ///
    /// ストリーミングボディは読み取らない（空として扱う）。
    pub fn from_reqwest(request: &reqwest::Request) -> Self {
        let body = request
            .body()
            .and_then(reqwest::Body::as_bytes)
            .map(Bytes::copy_from_slice)
            .unwrap_or_default();
        let (body, body_truncated) = cap(body);

        Self {
            method: request.method().clone(),
            url: request.url().to_string(),
            headers: request.headers().clone(),
            body,
            body_truncated,
            remote_host: None,
        }
    }

    /// ヘッダを追加
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// ボディを設定
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        (self.body, self.body_truncated) = cap(body.into());
        self
    }

    /// 接続元ホストを設定
    pub fn with_remote_host(mut self, host: impl Into<String>) -> Self {
        self.remote_host = Some(host.into());
        self
    }
}

impl HttpExchange for CapturedRequest {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn body(&self) -> &[u8] {
        &self.body
    }

    fn is_truncated(&self) -> bool {
        self.body_truncated
    }
}

/// 取得済みレスポンス
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    /// ステータスコード
    pub status: StatusCode,
    /// ヘッダ
    pub headers: HeaderMap,
    /// ボディ（先頭 `MAX_CAPTURE_BYTES` まで）
    pub body: Bytes,
    /// 元のボディが上限を超えて切り詰められたか
    pub body_truncated: bool,
}

impl CapturedResponse {
    /// ヘッダ・ボディ無しのレスポンスを作成
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            body_truncated: false,
        }
    }

    /// ステータス・ヘッダ・ボディから作成
    pub fn from_parts(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        let (body, body_truncated) = cap(body);
        Self {
            status,
            headers,
            body,
            body_truncated,
        }
    }

    /// ヘッダを追加
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// ボディを設定
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        (self.body, self.body_truncated) = cap(body.into());
        self
    }
}

impl HttpExchange for CapturedResponse {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn body(&self) -> &[u8] {
        &self.body
    }

    fn is_truncated(&self) -> bool {
        self.body_truncated
    }
}

/// 上限で切り詰め、切り詰めが起きたかを返す
fn cap(body: Bytes) -> (Bytes, bool) {
    if body.len() > MAX_CAPTURE_BYTES {
        (body.slice(..MAX_CAPTURE_BYTES), true)
    } else {
        (body, false)
    }
}

/// IPv4-mapped IPv6（::ffff:x.x.x.x）をIPv4に正規化する
pub fn normalize_ip(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}

/// ボディをテキストとして取得する
///
/// `reference_url` はログ出力用で、デコード結果には影響しない。
pub fn body_text(exchange: &impl HttpExchange, reference_url: &str) -> String {
    let body = exchange.body();
    if body.is_empty() {
        return String::new();
    }

    let media = match header(exchange, CONTENT_TYPE.as_str()) {
        Some(content_type) => match content_type.parse::<Mime>() {
            Ok(media) => Some(media),
            Err(_) => {
                debug!(url = reference_url, content_type = %content_type, "unparseable content type, body not captured");
                return BINARY_PLACEHOLDER.to_string();
            }
        },
        None => None,
    };

    if let Some(media) = &media {
        if !is_textual(media) {
            return BINARY_PLACEHOLDER.to_string();
        }
    }

    let encoding = match media.as_ref().and_then(|m| m.get_param(mime::CHARSET)) {
        Some(label) => match Encoding::for_label(label.as_str().as_bytes()) {
            Some(encoding) => encoding,
            None => {
                debug!(url = reference_url, charset = label.as_str(), "unsupported charset");
                return UNDECODABLE_PLACEHOLDER.to_string();
            }
        },
        None => UTF_8,
    };

    let truncated = exchange.is_truncated();
    let bytes = &body[..body.len().min(MAX_CAPTURE_BYTES)];
    match encoding.decode_without_bom_handling_and_without_replacement(bytes) {
        Some(text) => text.into_owned(),
        // 上限で切り詰めた場合は末尾の文字が途中で切れている可能性がある
        None if truncated => encoding.decode_without_bom_handling(bytes).0.into_owned(),
        None => {
            debug!(
                url = reference_url,
                charset = encoding.name(),
                "body could not be decoded"
            );
            UNDECODABLE_PLACEHOLDER.to_string()
        }
    }
}

fn is_textual(media: &Mime) -> bool {
    if media.type_() == mime::TEXT {
        return true;
    }
    let structured = [mime::JSON, mime::XML];
    if structured
        .iter()
        .any(|name| media.subtype() == *name || media.suffix() == Some(*name))
    {
        return true;
    }
    media.type_() == mime::APPLICATION
        && (media.subtype() == mime::WWW_FORM_URLENCODED || media.subtype() == mime::JAVASCRIPT)
}

/// ヘッダを決定的な単一文字列に変換する
///
/// ヘッダ名でソートし、同名の値は `,` で、`名前:値` の組は改行で連結する。
pub fn headers_text(exchange: &impl HttpExchange) -> String {
    let mut grouped: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for (name, value) in exchange.headers() {
        grouped
            .entry(name.as_str())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }

    grouped
        .into_iter()
        .map(|(name, values)| format!("{name}{NAME_SEPARATOR}{}", values.join(VALUE_SEPARATOR)))
        .collect::<Vec<_>>()
        .join(PAIR_SEPARATOR)
}

/// 指定ヘッダの最初の値
pub fn header(exchange: &impl HttpExchange, name: &str) -> Option<String> {
    exchange
        .headers()
        .get(name)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn response_with(content_type: &str, body: impl Into<Bytes>) -> CapturedResponse {
        CapturedResponse::new(StatusCode::OK)
            .with_header(CONTENT_TYPE, HeaderValue::from_str(content_type).unwrap())
            .with_body(body)
    }

    #[test]
    fn test_body_text_decodes_json() {
        let response = response_with("application/json", r#"{"ok":true}"#);
        assert_eq!(body_text(&response, "/x"), r#"{"ok":true}"#);
    }

    #[test]
    fn test_body_text_accepts_structured_suffix() {
        let response = response_with("application/fhir+json;charset=UTF-8", "{}");
        assert_eq!(body_text(&response, "/x"), "{}");

        let response = response_with("application/atom+xml", "<feed/>");
        assert_eq!(body_text(&response, "/x"), "<feed/>");
    }

    #[test]
    fn test_body_text_uses_declared_charset() {
        // "café" in ISO-8859-1
        let response = response_with("text/plain; charset=ISO-8859-1", vec![0x63, 0x61, 0x66, 0xE9]);
        assert_eq!(body_text(&response, "/x"), "café");
    }

    #[test]
    fn test_body_text_defaults_to_utf8_without_content_type() {
        let request = CapturedRequest::new(Method::POST, "/x").with_body("héllo");
        assert_eq!(body_text(&request, "/x"), "héllo");
    }

    #[test]
    fn test_body_text_binary_placeholder() {
        let response = response_with("image/png", vec![0x89, 0x50, 0x4E, 0x47]);
        assert_eq!(body_text(&response, "/x"), BINARY_PLACEHOLDER);

        let response = response_with("application/octet-stream", "abc");
        assert_eq!(body_text(&response, "/x"), BINARY_PLACEHOLDER);
    }

    #[test]
    fn test_body_text_decode_failure_degrades() {
        let response = response_with("text/plain; charset=utf-8", vec![0xFF, 0xFE, 0xFD]);
        assert_eq!(body_text(&response, "/x"), UNDECODABLE_PLACEHOLDER);

        let response = response_with("text/plain; charset=no-such-charset", "abc");
        assert_eq!(body_text(&response, "/x"), UNDECODABLE_PLACEHOLDER);
    }

    #[test]
    fn test_body_text_empty_body() {
        let response = CapturedResponse::new(StatusCode::NO_CONTENT);
        assert_eq!(body_text(&response, "/x"), "");
    }

    #[test]
    fn test_body_is_capped() {
        let large = "a".repeat(MAX_CAPTURE_BYTES + 10);
        let response = response_with("text/plain", large);
        assert_eq!(response.body.len(), MAX_CAPTURE_BYTES);
        assert_eq!(body_text(&response, "/x").len(), MAX_CAPTURE_BYTES);
    }

    #[test]
    fn test_truncated_multibyte_is_decoded_lossily() {
        // 3-byte characters so the cap splits the last one
        let large = "あ".repeat(MAX_CAPTURE_BYTES / 3 + 1);
        let response = response_with("text/plain; charset=utf-8", large);
        let text = body_text(&response, "/x");
        assert!(text.starts_with("あああ"));
        assert_ne!(text, UNDECODABLE_PLACEHOLDER);
    }

    #[test]
    fn test_full_size_body_is_not_treated_as_truncated() {
        let exact = vec![0xFFu8; MAX_CAPTURE_BYTES];
        let response = response_with("text/plain; charset=utf-8", exact);
        assert!(!response.body_truncated);
        assert_eq!(body_text(&response, "/x"), UNDECODABLE_PLACEHOLDER);

        let over = vec![0xFFu8; MAX_CAPTURE_BYTES + 1];
        let response = response_with("text/plain; charset=utf-8", over);
        assert!(response.body_truncated);
        assert_ne!(body_text(&response, "/x"), UNDECODABLE_PLACEHOLDER);
    }

    #[test]
    fn test_headers_text_is_sorted_and_grouped() {
        let request = CapturedRequest::new(Method::GET, "/x")
            .with_header(HeaderName::from_static("x-b"), HeaderValue::from_static("2"))
            .with_header(HeaderName::from_static("accept"), HeaderValue::from_static("a"))
            .with_header(HeaderName::from_static("x-b"), HeaderValue::from_static("3"));

        assert_eq!(headers_text(&request), "accept:a\nx-b:2,3");
    }

    #[test]
    fn test_headers_text_is_stable_regardless_of_insertion_order() {
        let a = CapturedRequest::new(Method::GET, "/x")
            .with_header(HeaderName::from_static("b"), HeaderValue::from_static("1"))
            .with_header(HeaderName::from_static("a"), HeaderValue::from_static("2"));
        let b = CapturedRequest::new(Method::GET, "/x")
            .with_header(HeaderName::from_static("a"), HeaderValue::from_static("2"))
            .with_header(HeaderName::from_static("b"), HeaderValue::from_static("1"));

        assert_eq!(headers_text(&a), headers_text(&b));
        assert_eq!(headers_text(&CapturedRequest::new(Method::GET, "/x")), "");
    }

    #[test]
    fn test_header_returns_first_value() {
        let request = CapturedRequest::new(Method::GET, "/x")
            .with_header(
                HeaderName::from_static("x-forwarded-for"),
                HeaderValue::from_static("1.2.3.4"),
            )
            .with_header(
                HeaderName::from_static("x-forwarded-for"),
                HeaderValue::from_static("5.6.7.8"),
            );

        assert_eq!(header(&request, "X-Forwarded-For").as_deref(), Some("1.2.3.4"));
        assert_eq!(header(&request, "x-missing"), None);
    }

    #[test]
    fn test_from_parts_reads_connect_info() {
        let mut request = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/case/?a=1")
            .header("content-type", "application/json")
            .body(())
            .unwrap();
        let addr: SocketAddr = "[::ffff:10.0.0.5]:5000".parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        let (parts, _) = request.into_parts();

        let captured = CapturedRequest::from_parts(&parts, Bytes::from_static(b"{}"));

        assert_eq!(captured.method, Method::POST);
        assert_eq!(captured.url, "/case/?a=1");
        assert_eq!(captured.remote_host.as_deref(), Some("10.0.0.5"));
        assert_eq!(body_text(&captured, &captured.url), "{}");
    }

    #[test]
    fn test_from_reqwest_reads_buffered_body() {
        let client = reqwest::Client::new();
        let request = client
            .post("http://upstream.local/fhir/Encounter")
            .header("content-type", "application/json")
            .body(r#"{"resourceType":"Encounter"}"#)
            .build()
            .unwrap();

        let captured = CapturedRequest::from_reqwest(&request);

        assert_eq!(captured.url, "http://upstream.local/fhir/Encounter");
        assert_eq!(captured.method, Method::POST);
        assert_eq!(
            body_text(&captured, &captured.url),
            r#"{"resourceType":"Encounter"}"#
        );
        assert!(captured.remote_host.is_none());
    }

    #[test]
    fn test_normalize_ip() {
        let mapped = IpAddr::V6(Ipv4Addr::new(192, 168, 1, 1).to_ipv6_mapped());
        assert_eq!(normalize_ip(mapped), IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)));

        let v6 = IpAddr::V6(Ipv6Addr::LOCALHOST);
        assert_eq!(normalize_ip(v6), v6);
    }
}
