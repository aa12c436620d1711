//! Lifecycle sentinels carried in the `query` field of a [`QueryRequest`].
//!
//! ```text
//! CREATE_CONNECTION|server|db|user|pass|port   (connection_id = -1)
//! CLOSE_CONNECTION                              (connection_id = id)
//! CLOSE_ALL_CONNECTIONS                         (connection_id = -1)
//! ```
//!
//! Anything else is SQL, interpreted through the request's flags.

use super::QueryRequest;
use crate::domain::query::{ConnectParams, ConnectionId, NO_ID, QueryKind, QueryPayload};

pub const CREATE_CONNECTION: &str = "CREATE_CONNECTION";
pub const CLOSE_CONNECTION: &str = "CLOSE_CONNECTION";
pub const CLOSE_ALL_CONNECTIONS: &str = "CLOSE_ALL_CONNECTIONS";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
  #[error("Malformed CREATE_CONNECTION request: expected server|db|user|pass|port")]
  MalformedCreate,
  #[error("Invalid port: {0}")]
  InvalidPort(String),
  #[error("Image update without an image path")]
  MissingImagePath,
}

/// What a forwarded request asks the authoritative node to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestedOperation {
  CreateConnection(ConnectParams),
  CloseConnection(ConnectionId),
  CloseAll,
  Query {
    connection_id: ConnectionId,
    payload: QueryPayload,
  },
}

/// Kind of query a raw request would run, for failure replies on requests
/// that could not be classified
pub fn request_kind(request: &QueryRequest) -> QueryKind {
  match (request.is_image, request.is_select) {
    (true, true) => QueryKind::ImageSelect,
    (true, false) => QueryKind::ImageUpdate,
    (false, true) => QueryKind::Select,
    (false, false) => QueryKind::Update,
  }
}

pub fn is_create_connection(request: &QueryRequest) -> bool {
  request.query.starts_with(CREATE_CONNECTION)
}

pub fn classify(request: &QueryRequest) -> Result<RequestedOperation, ProtocolError> {
  let query = request.query.as_str();

  if let Some(rest) = query.strip_prefix(CREATE_CONNECTION) {
    let rest = rest.strip_prefix('|').ok_or(ProtocolError::MalformedCreate)?;
    return parse_create(rest).map(RequestedOperation::CreateConnection);
  }
  if query == CLOSE_ALL_CONNECTIONS {
    return Ok(RequestedOperation::CloseAll);
  }
  if query == CLOSE_CONNECTION {
    return Ok(RequestedOperation::CloseConnection(request.connection_id));
  }

  let sql = request.query.clone();
  let payload = match request_kind(request) {
    QueryKind::ImageSelect => QueryPayload::ImageSelect { sql },
    QueryKind::ImageUpdate => QueryPayload::ImageUpdate {
      sql,
      column: request.update_param.clone().unwrap_or_default(),
      param_id: request.param_id.unwrap_or(1),
      image_path: request.image_path.clone().ok_or(ProtocolError::MissingImagePath)?,
    },
    QueryKind::Select => QueryPayload::Select { sql },
    _ => QueryPayload::Update { statements: vec![sql] },
  };

  Ok(RequestedOperation::Query {
    connection_id: request.connection_id,
    payload,
  })
}

/// `server|db|user|pass|port`. The password may itself contain `|`.
fn parse_create(rest: &str) -> Result<ConnectParams, ProtocolError> {
  let (head, port) = rest.rsplit_once('|').ok_or(ProtocolError::MalformedCreate)?;
  let mut parts = head.splitn(4, '|');
  let (Some(server), Some(database), Some(user), Some(password)) = (parts.next(), parts.next(), parts.next(), parts.next())
  else {
    return Err(ProtocolError::MalformedCreate);
  };
  let port = port
    .trim()
    .parse::<u16>()
    .map_err(|_| ProtocolError::InvalidPort(port.to_string()))?;

  Ok(ConnectParams::new(server, database, user, password, port))
}

// ============================================================================
// Encoding
// ============================================================================

pub fn create_connection(params: &ConnectParams) -> QueryRequest {
  let query = format!(
    "{CREATE_CONNECTION}|{}|{}|{}|{}|{}",
    params.server, params.database, params.user, params.password, params.port
  );
  QueryRequest::sql(NO_ID, query, false)
}

pub fn close_connection(connection_id: ConnectionId) -> QueryRequest {
  QueryRequest::sql(connection_id, CLOSE_CONNECTION, false)
}

pub fn close_all() -> QueryRequest {
  QueryRequest::sql(NO_ID, CLOSE_ALL_CONNECTIONS, false)
}

/// Requests for a query payload. Multi-statement updates are sent as one
/// request per statement; Close and EndPlay map to their sentinels.
pub fn encode_payload(connection_id: ConnectionId, payload: &QueryPayload) -> Vec<QueryRequest> {
  match payload {
    QueryPayload::Update { statements } => statements
      .iter()
      .map(|sql| QueryRequest::sql(connection_id, sql.clone(), false))
      .collect(),
    QueryPayload::Select { sql } => vec![QueryRequest::sql(connection_id, sql.clone(), true)],
    QueryPayload::ImageUpdate {
      sql,
      column,
      param_id,
      image_path,
    } => vec![QueryRequest {
      connection_id,
      query: sql.clone(),
      is_select: false,
      is_image: true,
      update_param: Some(column.clone()),
      param_id: Some(*param_id),
      image_path: Some(image_path.clone()),
    }],
    QueryPayload::ImageSelect { sql } => vec![QueryRequest {
      is_image: true,
      ..QueryRequest::sql(connection_id, sql.clone(), true)
    }],
    QueryPayload::Close => vec![close_connection(connection_id)],
    QueryPayload::EndPlay => vec![close_all()],
  }
}
