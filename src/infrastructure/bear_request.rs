use crate::infrastructure::error::BridgeError;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::Url;

const BEAR_ENDPOINT: &str = "bear://x-callback-url/";

/// RFC 3986 unreserved characters only. Used for note bodies and for callback
/// URLs embedded as a query value, where `:/?&=` must not survive.
const STRICT_UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Plain query values (titles, tags, ids). Keeps readable sub-delimiters but
/// never the pair separators `&`, `=`, `+` or `#`.
const QUERY_VALUE: &AsciiSet = &STRICT_UNRESERVED
    .remove(b'!')
    .remove(b'$')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b',')
    .remove(b';')
    .remove(b':')
    .remove(b'@')
    .remove(b'/')
    .remove(b'?');

pub fn encode_strict(value: &str) -> String {
    utf8_percent_encode(value, STRICT_UNRESERVED).to_string()
}

pub fn encode_query_value(value: &str) -> String {
    utf8_percent_encode(value, QUERY_VALUE).to_string()
}

/// Splits a raw query into decoded pairs. `+` is kept literally, matching how
/// Bear and the system URL APIs read x-callback parameters.
pub fn decode_query_pairs(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (
                percent_decode_str(key).decode_utf8_lossy().into_owned(),
                percent_decode_str(value).decode_utf8_lossy().into_owned(),
            )
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Presentation {
    pub open_note: bool,
    pub show_window: bool,
}

impl Presentation {
    pub const HIDDEN: Self = Self {
        open_note: false,
        show_window: false,
    };
    pub const SHOWN: Self = Self {
        open_note: true,
        show_window: true,
    };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Callbacks {
    pub success: String,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
struct QueryBuilder {
    pairs: Vec<String>,
}

impl QueryBuilder {
    fn query(mut self, key: &str, value: &str) -> Self {
        self.pairs.push(format!("{key}={}", encode_query_value(value)));
        self
    }

    fn strict(mut self, key: &str, value: &str) -> Self {
        self.pairs.push(format!("{key}={}", encode_strict(value)));
        self
    }

    fn flag(self, key: &str, enabled: bool) -> Self {
        self.query(key, if enabled { "yes" } else { "no" })
    }

    fn presentation(self, presentation: Presentation) -> Self {
        self.flag("open_note", presentation.open_note)
            .flag("show_window", presentation.show_window)
    }

    fn callbacks(self, callbacks: Option<&Callbacks>) -> Self {
        let Some(callbacks) = callbacks else {
            return self;
        };
        let builder = self.strict("x-success", &callbacks.success);
        match callbacks.error.as_deref() {
            Some(error) => builder.strict("x-error", error),
            None => builder,
        }
    }

    fn build(self, base: &str, action: &str) -> Result<Url, BridgeError> {
        let raw = if self.pairs.is_empty() {
            format!("{base}{action}")
        } else {
            format!("{base}{action}?{}", self.pairs.join("&"))
        };
        Url::parse(&raw)
            .map_err(|error| BridgeError::Encoding(format!("invalid {action} request url: {error}")))
    }
}

/// Builds Bear x-callback-url requests and the callback URLs Bear answers on.
#[derive(Debug, Clone)]
pub struct NoteRequestEncoder {
    callback_scheme: String,
}

impl NoteRequestEncoder {
    pub fn new(callback_scheme: impl Into<String>) -> Self {
        Self {
            callback_scheme: callback_scheme.into(),
        }
    }

    pub fn callback_scheme(&self) -> &str {
        &self.callback_scheme
    }

    pub fn callback_url(&self, host: &str, params: &[(&str, &str)]) -> Result<String, BridgeError> {
        let mut builder = QueryBuilder::default();
        for (key, value) in params {
            builder = builder.query(key, value);
        }
        let base = format!("{}://", self.callback_scheme);
        Ok(builder.build(&base, host)?.to_string())
    }

    pub fn open_note(&self, note_id: &str) -> Result<Url, BridgeError> {
        let note_id = require("note id", note_id)?;
        QueryBuilder::default()
            .query("id", note_id)
            .build(BEAR_ENDPOINT, "open-note")
    }

    pub fn open_note_by_title(
        &self,
        title: &str,
        presentation: Presentation,
        callbacks: Option<&Callbacks>,
    ) -> Result<Url, BridgeError> {
        let title = require("note title", title)?;
        QueryBuilder::default()
            .query("title", title)
            .presentation(presentation)
            .flag("exclude_trashed", true)
            .callbacks(callbacks)
            .build(BEAR_ENDPOINT, "open-note")
    }

    pub fn fetch_note_by_id(&self, note_id: &str, callbacks: &Callbacks) -> Result<Url, BridgeError> {
        let note_id = require("note id", note_id)?;
        QueryBuilder::default()
            .query("id", note_id)
            .presentation(Presentation::HIDDEN)
            .flag("exclude_trashed", true)
            .callbacks(Some(callbacks))
            .build(BEAR_ENDPOINT, "open-note")
    }

    pub fn fetch_note_by_title(&self, title: &str, callbacks: &Callbacks) -> Result<Url, BridgeError> {
        self.open_note_by_title(title, Presentation::HIDDEN, Some(callbacks))
    }

    pub fn create_note(
        &self,
        body: &str,
        tags: &[String],
        presentation: Presentation,
        callbacks: Option<&Callbacks>,
    ) -> Result<Url, BridgeError> {
        let tags = tags
            .iter()
            .map(|tag| tag.trim())
            .filter(|tag| !tag.is_empty())
            .collect::<Vec<_>>()
            .join(",");
        let mut builder = QueryBuilder::default().query("title", "").strict("text", body);
        if !tags.is_empty() {
            builder = builder.query("tags", &tags);
        }
        builder
            .presentation(presentation)
            .callbacks(callbacks)
            .build(BEAR_ENDPOINT, "create")
    }

    pub fn replace_note_text(
        &self,
        note_id: &str,
        body: &str,
        presentation: Presentation,
    ) -> Result<Url, BridgeError> {
        let note_id = require("note id", note_id)?;
        QueryBuilder::default()
            .query("id", note_id)
            .query("mode", "replace_all")
            .strict("text", body)
            .presentation(presentation)
            .build(BEAR_ENDPOINT, "add-text")
    }

    pub fn search_notes(
        &self,
        term: &str,
        tag: &str,
        callbacks: &Callbacks,
        api_token: &str,
    ) -> Result<Url, BridgeError> {
        let mut builder = QueryBuilder::default().query("term", term);
        if !tag.trim().is_empty() {
            builder = builder.query("tag", tag.trim());
        }
        builder
            .flag("show_window", false)
            .callbacks(Some(callbacks))
            .query("token", api_token)
            .build(BEAR_ENDPOINT, "search")
    }
}

fn require<'a>(field: &str, value: &'a str) -> Result<&'a str, BridgeError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(BridgeError::Encoding(format!("{field} must not be empty")));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encoder() -> NoteRequestEncoder {
        NoteRequestEncoder::new("fodabear")
    }

    fn param(url: &Url, name: &str) -> Option<String> {
        decode_query_pairs(url.query().unwrap_or_default())
            .into_iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    #[test]
    fn strict_and_query_rules_differ_on_url_characters() {
        assert_eq!(encode_strict("a://b?c=d&e"), "a%3A%2F%2Fb%3Fc%3Dd%26e");
        assert_eq!(encode_query_value("a://b?c=d&e"), "a://b?c%3Dd%26e");
        assert_eq!(encode_query_value("Daily Notes"), "Daily%20Notes");
        assert_eq!(encode_strict("x-y_z.w~"), "x-y_z.w~");
    }

    #[test]
    fn open_note_by_id_is_minimal() {
        let url = encoder().open_note("ABC-1").expect("url");
        assert_eq!(url.as_str(), "bear://x-callback-url/open-note?id=ABC-1");
        assert!(matches!(encoder().open_note("  "), Err(BridgeError::Encoding(_))));
    }

    #[test]
    fn fetch_by_title_is_hidden_and_carries_callbacks() {
        let success = encoder()
            .callback_url("open-daily-note-with-date-success", &[("date", "2024-06-15"), ("op", "t1")])
            .expect("callback");
        let callbacks = Callbacks {
            success: success.clone(),
            error: Some("fodabear://open-daily-note-with-date-error?date=2024-06-15".to_string()),
        };
        let url = encoder().fetch_note_by_title("2024-06-15", &callbacks).expect("url");

        assert_eq!(url.path(), "/open-note");
        assert_eq!(param(&url, "title").as_deref(), Some("2024-06-15"));
        assert_eq!(param(&url, "open_note").as_deref(), Some("no"));
        assert_eq!(param(&url, "show_window").as_deref(), Some("no"));
        assert_eq!(param(&url, "exclude_trashed").as_deref(), Some("yes"));
        assert_eq!(param(&url, "x-success"), Some(success));
        assert!(!url.query().unwrap_or_default().contains("date=2024-06-15&op"));
    }

    #[test]
    fn replace_text_encodes_body_strictly() {
        let body = "# Title\n- [ ] 09:00 - 10:00: A&B = C + D\nhttps://example.com/?q=1#x";
        let url = encoder()
            .replace_note_text("NOTE-1", body, Presentation::HIDDEN)
            .expect("url");

        let query = url.query().unwrap_or_default();
        assert!(query.starts_with("id=NOTE-1&mode=replace_all&text="));
        assert!(!query.contains('#'));
        assert!(url.fragment().is_none());
        assert_eq!(param(&url, "text").as_deref(), Some(body));
    }

    #[test]
    fn create_note_joins_tags_and_skips_blank_ones() {
        let url = encoder()
            .create_note(
                "# 2024-06-15",
                &["Daily Notes".to_string(), " ".to_string(), "journal".to_string()],
                Presentation::HIDDEN,
                None,
            )
            .expect("url");
        assert_eq!(url.path(), "/create");
        assert_eq!(param(&url, "title").as_deref(), Some(""));
        assert_eq!(param(&url, "tags").as_deref(), Some("Daily Notes,journal"));
        assert_eq!(param(&url, "text").as_deref(), Some("# 2024-06-15"));
    }

    #[test]
    fn search_carries_token_and_callbacks() {
        let callbacks = Callbacks {
            success: "fodabear://searchSuccess?op=t9".to_string(),
            error: Some("fodabear://searchError?op=t9".to_string()),
        };
        let url = encoder()
            .search_notes("2024-06-15", "Daily Notes", &callbacks, "1C9DA6-78D2A9-694BA7")
            .expect("url");
        assert_eq!(url.path(), "/search");
        assert_eq!(param(&url, "tag").as_deref(), Some("Daily Notes"));
        assert_eq!(param(&url, "token").as_deref(), Some("1C9DA6-78D2A9-694BA7"));
        assert_eq!(param(&url, "x-error").as_deref(), Some("fodabear://searchError?op=t9"));
        assert_eq!(param(&url, "op"), None);
    }

    #[test]
    fn inner_callback_separators_do_not_leak_into_outer_query() {
        let inner = encoder()
            .callback_url("update-home-note-if-needed-success", &[("date", "2024-06-15"), ("id", "A&id=B")])
            .expect("callback");
        let callbacks = Callbacks {
            success: inner.clone(),
            error: None,
        };
        let url = encoder().fetch_note_by_id("HOME", &callbacks).expect("url");
        let pairs = decode_query_pairs(url.query().unwrap_or_default());

        assert_eq!(pairs.iter().filter(|(key, _)| key == "id").count(), 1);
        assert_eq!(pairs.iter().filter(|(key, _)| key == "date").count(), 0);
        let callback = Url::parse(&param(&url, "x-success").expect("x-success")).expect("inner url");
        let inner_pairs = decode_query_pairs(callback.query().unwrap_or_default());
        assert!(inner_pairs.contains(&("id".to_string(), "A&id=B".to_string())));
    }

    proptest! {
        #[test]
        fn strict_body_survives_outer_query_decoding(body in "[ -~\n\u{e1}\u{2713}]{0,64}") {
            let url = encoder()
                .replace_note_text("NOTE", &body, Presentation::HIDDEN)
                .expect("url");
            prop_assert_eq!(param(&url, "text"), Some(body));
        }
    }
}
