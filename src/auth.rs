// Credential check against the `Users` table, joined to the staff roster.
//
// Passwords are compared as stored (plaintext). There is no lockout, no
// session expiry and no distinction between unknown user, wrong password and
// backend failure once the result reaches the console.
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{error, info};

use crate::config::{SourceConfig, StaffColumns};
use crate::error::Result;
use crate::loader::quote_ident;
use crate::util::{clean_text, parse_date_safe};

const MANAGER_ROLES: &[&str] = &["Manager", "Hyperviseur"];

#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatedUser {
    pub user_name: String,
    pub identifier: String,
    pub role: Option<String>,
    pub hire_date: Option<NaiveDate>,
}

impl AuthenticatedUser {
    pub fn is_manager(&self) -> bool {
        self.role
            .as_deref()
            .map_or(false, |r| MANAGER_ROLES.contains(&r))
    }
}

/// Look up `user_name`/`password` in the credential table joined with the
/// staff table on identifier. `Ok(None)` is "no match".
pub fn authenticate(
    conn: &Connection,
    source: &SourceConfig,
    staff: &StaffColumns,
    user_name: &str,
    password: &str,
) -> Result<Option<AuthenticatedUser>> {
    let id = quote_ident(&staff.identifier);
    let role = staff
        .role
        .as_deref()
        .map(|c| format!("e.{}", quote_ident(c)))
        .unwrap_or_else(|| "NULL".to_string());
    let hire = staff
        .hire_date
        .as_deref()
        .map(|c| format!("e.{}", quote_ident(c)))
        .unwrap_or_else(|| "NULL".to_string());
    let sql = format!(
        "SELECT CAST(u.{id} AS TEXT), CAST({role} AS TEXT), CAST({hire} AS TEXT) \
         FROM {users} u JOIN {staff_table} e ON u.{id} = e.{id} \
         WHERE u.\"UserName\" = ?1 AND u.\"PassWord\" = ?2 \
         LIMIT 1",
        id = id,
        role = role,
        hire = hire,
        users = quote_ident(&source.users),
        staff_table = quote_ident(&source.staff),
    );

    let row = conn
        .query_row(&sql, params![user_name, password], |row| {
            Ok((
                row.get::<_, Option<String>>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })
        .optional()?;

    Ok(row.and_then(|(identifier, role, hire)| {
        Some(AuthenticatedUser {
            user_name: user_name.to_string(),
            identifier: clean_text(identifier.as_deref())?,
            role: clean_text(role.as_deref()),
            hire_date: parse_date_safe(hire.as_deref()),
        })
    }))
}

/// Console-facing login: any failure, including a backend error, collapses
/// to `None` after being logged.
pub fn login(
    conn: &Connection,
    source: &SourceConfig,
    staff: &StaffColumns,
    user_name: &str,
    password: &str,
) -> Option<AuthenticatedUser> {
    match authenticate(conn, source, staff, user_name, password) {
        Ok(Some(user)) => {
            info!("User '{}' logged in", user.user_name);
            Some(user)
        }
        Ok(None) => None,
        Err(e) => {
            error!("Authentication backend error: {}", e);
            None
        }
    }
}
