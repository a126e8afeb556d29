use crate::calc::RosterStudent;
use crate::ipc::error::err;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn bad_params(message: impl Into<String>) -> Self {
        Self {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            code: "not_found",
            message: message.into(),
            details: None,
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self {
            code: "forbidden",
            message: message.into(),
            details: None,
        }
    }

    pub fn db_query(e: rusqlite::Error) -> Self {
        Self {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a string", key))),
    }
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// A teaching assignment row joined with its subject and class, loaded once
/// per request. Every attendance/grade operation goes through this.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub id: String,
    pub teacher_id: String,
    pub subject_id: String,
    pub class_id: String,
    pub academic_year: String,
    pub subject_name: String,
    pub subject_code: String,
    pub class_name: String,
}

pub fn load_assignment(conn: &Connection, assignment_id: &str) -> Result<Assignment, HandlerErr> {
    conn.query_row(
        "SELECT ts.id, ts.teacher_id, ts.subject_id, ts.class_id, ts.academic_year,
                s.name, s.code, c.name
         FROM teacher_subjects ts
         JOIN subjects s ON s.id = ts.subject_id
         JOIN classes c ON c.id = ts.class_id
         WHERE ts.id = ?",
        [assignment_id],
        |r| {
            Ok(Assignment {
                id: r.get(0)?,
                teacher_id: r.get(1)?,
                subject_id: r.get(2)?,
                class_id: r.get(3)?,
                academic_year: r.get(4)?,
                subject_name: r.get(5)?,
                subject_code: r.get(6)?,
                class_name: r.get(7)?,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::db_query)?
    .ok_or_else(|| HandlerErr::not_found("assignment not found"))
}

/// Ownership gate: the acting teacher must own the assignment before any
/// record under it is read or written.
pub fn require_owner(assignment: &Assignment, teacher_id: &str) -> Result<(), HandlerErr> {
    if assignment.teacher_id != teacher_id {
        return Err(
            HandlerErr::forbidden("assignment is not owned by the acting teacher")
                .with_details(json!({ "assignmentId": assignment.id })),
        );
    }
    Ok(())
}

pub fn assignment_json(a: &Assignment) -> serde_json::Value {
    json!({
        "id": a.id,
        "teacherId": a.teacher_id,
        "academicYear": a.academic_year,
        "subject": {
            "id": a.subject_id,
            "name": a.subject_name,
            "code": a.subject_code
        },
        "schoolClass": {
            "id": a.class_id,
            "name": a.class_name
        }
    })
}

/// Active students of a class ordered by name.
pub fn active_roster(conn: &Connection, class_id: &str) -> Result<Vec<RosterStudent>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, nis, name
             FROM students
             WHERE class_id = ? AND status = 'active'
             ORDER BY name",
        )
        .map_err(HandlerErr::db_query)?;
    stmt.query_map([class_id], |r| {
        Ok(RosterStudent {
            id: r.get(0)?,
            nis: r.get(1)?,
            name: r.get(2)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db_query)
}

pub fn roster_json(roster: &[RosterStudent]) -> Vec<serde_json::Value> {
    roster
        .iter()
        .map(|s| json!({ "id": s.id, "nis": s.nis, "name": s.name }))
        .collect()
}
