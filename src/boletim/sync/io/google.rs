//! Google Sheets v4 over blocking HTTP, authenticated as a service account.

use std::collections::HashMap;
use std::fs;

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::boletim::sync::connection::Connector;
use crate::boletim::sync::error::{Result, SyncError};
use crate::boletim::sync::io::SheetBackend;
use crate::boletim::sync::io::a1::{CellRef, RangeRef, qualified};
use crate::boletim::sync::model::{CellStyle, CellValue, CredentialBundle, Rgb};

const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const SCOPES: &str =
    "https://www.googleapis.com/auth/spreadsheets https://www.googleapis.com/auth/drive";
const TOKEN_LIFETIME_SECS: i64 = 3600;

#[derive(Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Deserialize)]
struct SpreadsheetProperties {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    sheet_id: i64,
    title: String,
    #[serde(default)]
    grid_properties: GridProperties,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GridProperties {
    #[serde(default)]
    row_count: u32,
}

/// Authenticated HTTP client plus its bearer token.
#[derive(Debug, Clone)]
pub struct GoogleSession {
    http: Client,
    token: String,
}

impl GoogleSession {
    fn get(&self, url: Url) -> RequestBuilder {
        self.http.get(url).bearer_auth(&self.token)
    }

    fn put(&self, url: Url) -> RequestBuilder {
        self.http.put(url).bearer_auth(&self.token)
    }

    fn post(&self, url: Url) -> RequestBuilder {
        self.http.post(url).bearer_auth(&self.token)
    }
}

/// Exchanges a service-account key for an access token.
#[derive(Debug, Clone, Default)]
pub struct GoogleConnector {
    http: Client,
}

impl Connector for GoogleConnector {
    type Client = GoogleSession;

    #[instrument(level = "debug", skip_all, fields(path = %credentials.path.display()))]
    fn authorize(&self, credentials: &CredentialBundle) -> Result<GoogleSession> {
        let source = fs::read_to_string(&credentials.path)?;
        let key: ServiceAccountKey = serde_json::from_str(&source)?;
        let token_uri = key.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);

        let issued_at = Utc::now().timestamp();
        let claims = Claims {
            iss: &key.client_email,
            scope: SCOPES,
            aud: token_uri,
            iat: issued_at,
            exp: issued_at + TOKEN_LIFETIME_SECS,
        };
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())?;
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &signing_key)?;

        let response = self
            .http
            .post(token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()?;
        let token: TokenResponse = check(response)?.json()?;
        debug!(identity = %key.client_email, "access token issued");
        Ok(GoogleSession {
            http: self.http.clone(),
            token: token.access_token,
        })
    }

    fn probe(&self, client: &mut GoogleSession, resource_id: &str) -> Result<()> {
        let mut url = spreadsheet_url(resource_id, &[])?;
        url.query_pairs_mut().append_pair("fields", "properties.title");
        check(client.get(url).send()?)?;
        Ok(())
    }
}

/// One spreadsheet reached through an authorized session.
#[derive(Debug)]
pub struct GoogleSheets {
    session: GoogleSession,
    spreadsheet_id: String,
    tabs: HashMap<String, (i64, u32)>,
}

impl GoogleSheets {
    pub fn new(session: GoogleSession, spreadsheet_id: impl Into<String>) -> Self {
        Self {
            session,
            spreadsheet_id: spreadsheet_id.into(),
            tabs: HashMap::new(),
        }
    }

    /// Sheet id and grid row count, refreshed from the service.
    fn tab_properties(&mut self, tab: &str) -> Result<(i64, u32)> {
        let mut url = spreadsheet_url(&self.spreadsheet_id, &[])?;
        url.query_pairs_mut().append_pair(
            "fields",
            "sheets.properties(sheetId,title,gridProperties.rowCount)",
        );
        let properties: SpreadsheetProperties = check(self.session.get(url).send()?)?.json()?;
        self.tabs = properties
            .sheets
            .into_iter()
            .map(|entry| {
                let props = entry.properties;
                (props.title, (props.sheet_id, props.grid_properties.row_count))
            })
            .collect();
        self.tabs
            .get(tab)
            .copied()
            .ok_or_else(|| SyncError::TabNotFound(tab.to_string()))
    }

    fn sheet_id(&mut self, tab: &str) -> Result<i64> {
        match self.tabs.get(tab) {
            Some((sheet_id, _)) => Ok(*sheet_id),
            None => Ok(self.tab_properties(tab)?.0),
        }
    }

    fn values_url(&self, range: &str, suffix: Option<&str>) -> Result<Url> {
        let segment = match suffix {
            Some(suffix) => format!("{range}:{suffix}"),
            None => range.to_string(),
        };
        spreadsheet_url(&self.spreadsheet_id, &["values", &segment])
    }

    fn batch_update(&mut self, requests: Value) -> Result<()> {
        let url = spreadsheet_url(&format!("{}:batchUpdate", self.spreadsheet_id), &[])?;
        let body = json!({ "requests": requests });
        check(self.session.post(url).json(&body).send()?)?;
        Ok(())
    }
}

impl SheetBackend for GoogleSheets {
    #[instrument(level = "debug", skip_all, fields(tab = %tab))]
    fn tab_values(&mut self, tab: &str) -> Result<Vec<Vec<String>>> {
        let url = self.values_url(&qualified(tab, "A:ZZZ"), None)?;
        let body: ValueRange = check(self.session.get(url).send()?)?.json()?;
        Ok(body
            .values
            .into_iter()
            .map(|row| row.into_iter().map(|cell| display_value(&cell)).collect())
            .collect())
    }

    fn row_count(&mut self, tab: &str) -> Result<u32> {
        Ok(self.tab_properties(tab)?.1)
    }

    fn append_blank_row(&mut self, tab: &str) -> Result<()> {
        let mut url = self.values_url(&qualified(tab, "A1"), Some("append"))?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED")
            .append_pair("insertDataOption", "INSERT_ROWS");
        let body = json!({ "values": [[""]] });
        check(self.session.post(url).json(&body).send()?)?;
        self.tabs.remove(tab);
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(tab = %tab, range = %range))]
    fn write_range(&mut self, tab: &str, range: &RangeRef, rows: &[Vec<CellValue>]) -> Result<()> {
        let target = qualified(tab, &range.to_string());
        let mut url = self.values_url(&target, None)?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED");
        let values: Vec<Vec<Value>> = rows
            .iter()
            .map(|row| row.iter().map(CellValue::to_json).collect())
            .collect();
        let body = json!({ "range": target, "majorDimension": "ROWS", "values": values });
        check(self.session.put(url).json(&body).send()?)?;
        Ok(())
    }

    fn format_range(&mut self, tab: &str, range: &RangeRef, style: &CellStyle) -> Result<()> {
        let sheet_id = self.sheet_id(tab)?;
        let request = json!([{
            "repeatCell": {
                "range": grid_range(sheet_id, range),
                "cell": {
                    "userEnteredFormat": {
                        "backgroundColor": color_json(style.background),
                        "textFormat": { "bold": style.bold }
                    }
                },
                "fields": "userEnteredFormat(backgroundColor,textFormat.bold)"
            }
        }]);
        self.batch_update(request)
    }

    fn read_formula(&mut self, tab: &str, cell: CellRef) -> Result<Option<String>> {
        let mut url = self.values_url(&qualified(tab, &cell.to_string()), None)?;
        url.query_pairs_mut()
            .append_pair("valueRenderOption", "FORMULA");
        let body: ValueRange = check(self.session.get(url).send()?)?.json()?;
        Ok(body
            .values
            .first()
            .and_then(|row| row.first())
            .map(display_value)
            .filter(|text| !text.is_empty()))
    }

    fn copy_formula(&mut self, tab: &str, source: CellRef, destination: &RangeRef) -> Result<()> {
        let sheet_id = self.sheet_id(tab)?;
        let source_range = RangeRef::column(source.column, source.row, source.row);
        let request = json!([{
            "copyPaste": {
                "source": grid_range(sheet_id, &source_range),
                "destination": grid_range(sheet_id, destination),
                "pasteType": "PASTE_FORMULA",
                "pasteOrientation": "NORMAL"
            }
        }]);
        self.batch_update(request)
    }
}

fn spreadsheet_url(spreadsheet: &str, segments: &[&str]) -> Result<Url> {
    let mut url = Url::parse(SHEETS_API).map_err(|error| SyncError::Config(error.to_string()))?;
    url.path_segments_mut()
        .map_err(|()| SyncError::Config(format!("{SHEETS_API} cannot take a path")))?
        .push(spreadsheet)
        .extend(segments);
    Ok(url)
}

/// Grid coordinates are zero-based and end-exclusive.
fn grid_range(sheet_id: i64, range: &RangeRef) -> Value {
    json!({
        "sheetId": sheet_id,
        "startRowIndex": range.first_row - 1,
        "endRowIndex": range.last_row,
        "startColumnIndex": range.first_column,
        "endColumnIndex": range.last_column + 1
    })
}

fn color_json(color: Rgb) -> Value {
    json!({ "red": color.red, "green": color.green, "blue": color.blue })
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Maps a non-success response to [`SyncError::Api`] with the service's
/// error message when one is present.
fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().unwrap_or_default();
    let message = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|body| {
            body.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or(text);
    debug!(status = status.as_u16(), %message, "service rejected the request");
    Err(SyncError::Api {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_encode_tab_names() {
        let url = spreadsheet_url("abc123", &["values", "'BASE VOZ'!A1:ZZZ"]).expect("valid url");
        assert_eq!(
            url.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/abc123/values/'BASE%20VOZ'!A1:ZZZ"
        );
    }

    #[test]
    fn grid_ranges_are_zero_based_and_exclusive() {
        let range = grid_range(42, &RangeRef::rows(11, 13, 4));
        assert_eq!(range["startRowIndex"], 10);
        assert_eq!(range["endRowIndex"], 13);
        assert_eq!(range["startColumnIndex"], 0);
        assert_eq!(range["endColumnIndex"], 4);
    }

    #[test]
    fn display_values_flatten_json() {
        assert_eq!(display_value(&json!("=A1")), "=A1");
        assert_eq!(display_value(&json!(12.5)), "12.5");
        assert_eq!(display_value(&Value::Null), "");
    }
}
