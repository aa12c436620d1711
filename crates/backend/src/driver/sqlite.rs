use std::path::Path;

use rusqlite::{Connection, types::ValueRef};
use tracing::{debug, warn};

use super::{Driver, DriverError};
use crate::domain::query::{ConnectParams, ResultSet, Value};

/// [`Driver`] backed by an embedded SQLite database.
///
/// `ConnectParams::database` is the database path (`:memory:` is accepted).
/// Server, user, password and port have no meaning for SQLite and are only
/// logged. Every connect option is applied as `PRAGMA key = value`.
#[derive(Default)]
pub struct SqliteDriver {
  conn: Option<Connection>,
}

impl SqliteDriver {
  fn conn(&self) -> Result<&Connection, DriverError> {
    self.conn.as_ref().ok_or(DriverError::NotConnected)
  }
}

fn value_from_ref(value: ValueRef<'_>) -> Value {
  match value {
    ValueRef::Null => Value::Null,
    ValueRef::Integer(v) => Value::Integer(v),
    ValueRef::Real(v) => Value::Real(v),
    ValueRef::Text(v) => Value::Text(String::from_utf8_lossy(v).into_owned()),
    ValueRef::Blob(v) => Value::Blob(v.to_vec()),
  }
}

impl Driver for SqliteDriver {
  fn connect(&mut self, params: &ConnectParams) -> Result<(), DriverError> {
    self.close();

    debug!(
      server = %params.server,
      database = %params.database,
      user = %params.user,
      port = params.port,
      "Opening SQLite database"
    );

    let conn = Connection::open(&params.database).map_err(|e| DriverError::Connect(e.to_string()))?;
    for option in &params.options {
      conn
        .pragma_update(None, &option.key, &option.value)
        .map_err(|e| DriverError::Connect(format!("PRAGMA {} = {}: {}", option.key, option.value, e)))?;
    }

    self.conn = Some(conn);
    Ok(())
  }

  fn close(&mut self) {
    if let Some(conn) = self.conn.take()
      && let Err((_, e)) = conn.close()
    {
      warn!(error = %e, "SQLite close reported an error");
    }
  }

  fn exec_update(&mut self, sql: &str) -> Result<(), DriverError> {
    self.conn()?.execute_batch(sql)?;
    Ok(())
  }

  fn exec_select(&mut self, sql: &str) -> Result<ResultSet, DriverError> {
    let conn = self.conn()?;
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();

    let mut rows = Vec::new();
    let mut cursor = stmt.query([])?;
    while let Some(row) = cursor.next()? {
      let mut values = Vec::with_capacity(width);
      for idx in 0..width {
        values.push(value_from_ref(row.get_ref(idx)?));
      }
      rows.push(values);
    }

    Ok(ResultSet { columns, rows })
  }

  fn write_image(&mut self, sql: &str, column: &str, param_id: i32, image_path: &Path) -> Result<(), DriverError> {
    let conn = self.conn()?;
    let bytes = std::fs::read(image_path)?;

    let mut stmt = conn.prepare(sql)?;
    if stmt.parameter_count() == 0 {
      return Err(DriverError::Image("statement has no parameter to bind the image to".to_string()));
    }

    let mut index = None;
    for prefix in [":", "@", "$"] {
      if let Some(idx) = stmt.parameter_index(&format!("{prefix}{column}"))? {
        index = Some(idx);
        break;
      }
    }
    let index = match index {
      Some(idx) => idx,
      None => {
        let idx = usize::try_from(param_id).unwrap_or(0).max(1);
        if idx > stmt.parameter_count() {
          return Err(DriverError::Image(format!(
            "parameter {} out of range (statement has {})",
            idx,
            stmt.parameter_count()
          )));
        }
        idx
      }
    };

    stmt.raw_bind_parameter(index, &bytes)?;
    let changed = stmt.raw_execute()?;
    debug!(bytes = bytes.len(), rows = changed, "Wrote image");
    Ok(())
  }

  fn read_image(&mut self, sql: &str) -> Result<Vec<u8>, DriverError> {
    let conn = self.conn()?;
    let result = conn.query_row(sql, [], |row| {
      Ok(match row.get_ref(0)? {
        ValueRef::Blob(b) => Some(b.to_vec()),
        ValueRef::Text(t) => Some(t.to_vec()),
        _ => None,
      })
    });

    match result {
      Ok(Some(bytes)) => Ok(bytes),
      Ok(None) => Err(DriverError::Image("image column is empty".to_string())),
      Err(rusqlite::Error::QueryReturnedNoRows) => Err(DriverError::Image("no row matched".to_string())),
      Err(e) => Err(e.into()),
    }
  }
}

impl Drop for SqliteDriver {
  fn drop(&mut self) {
    self.close();
  }
}
