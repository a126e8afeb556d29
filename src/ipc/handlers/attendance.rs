use crate::calc::{self, AttendanceStatus};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    assignment_json, get_required_str, load_assignment, now_rfc3339, require_owner, roster_json,
    Assignment, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use chrono::{Duration, Local, NaiveDate};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const NOTES_MAX_CHARS: usize = 255;
const SAVE_MAX_ENTRIES: usize = 500;
const RECAP_WINDOW_DAYS: i64 = 30;

fn parse_date(raw: &str) -> Result<NaiveDate, HandlerErr> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params("date must be YYYY-MM-DD").with_details(json!({ "date": raw })))
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

struct SaveEntry {
    student_id: String,
    status: AttendanceStatus,
    notes: Option<String>,
}

/// Validates the whole batch up front; the save is all-or-nothing, so one
/// bad entry must reject before anything is written.
fn validate_entries(
    conn: &Connection,
    assignment: &Assignment,
    raw: &[serde_json::Value],
) -> Result<Vec<SaveEntry>, HandlerErr> {
    if raw.is_empty() {
        return Err(HandlerErr::bad_params("entries must not be empty"));
    }
    if raw.len() > SAVE_MAX_ENTRIES {
        return Err(HandlerErr::bad_params("too many entries").with_details(json!({
            "entries": raw.len(),
            "max": SAVE_MAX_ENTRIES
        })));
    }

    let mut entries = Vec::with_capacity(raw.len());
    for (i, entry) in raw.iter().enumerate() {
        let Some(obj) = entry.as_object() else {
            return Err(HandlerErr::bad_params(format!("entry at index {} must be an object", i)));
        };
        let Some(student_id) = obj.get("studentId").and_then(|v| v.as_str()) else {
            return Err(HandlerErr::bad_params(format!("entry at index {} missing studentId", i)));
        };
        let Some(status_raw) = obj.get("status").and_then(|v| v.as_str()) else {
            return Err(HandlerErr::bad_params(format!("entry at index {} missing status", i)));
        };
        let Some(status) = AttendanceStatus::parse(status_raw) else {
            return Err(HandlerErr::bad_params(format!(
                "entry at index {}: status must be one of: hadir, sakit, izin, alfa",
                i
            ))
            .with_details(json!({ "status": status_raw })));
        };
        let notes = match obj.get("notes") {
            None => None,
            Some(v) if v.is_null() => None,
            Some(v) => {
                let Some(s) = v.as_str() else {
                    return Err(HandlerErr::bad_params(format!(
                        "entry at index {}: notes must be string or null",
                        i
                    )));
                };
                if s.chars().count() > NOTES_MAX_CHARS {
                    return Err(HandlerErr::bad_params(format!(
                        "entry at index {}: notes exceed {} characters",
                        i, NOTES_MAX_CHARS
                    )));
                }
                Some(s.to_string())
            }
        };

        let class_id: Option<String> = conn
            .query_row(
                "SELECT class_id FROM students WHERE id = ?",
                [student_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(HandlerErr::db_query)?;
        match class_id {
            None => {
                return Err(HandlerErr::bad_params(format!(
                    "entry at index {}: student not found",
                    i
                ))
                .with_details(json!({ "studentId": student_id })))
            }
            Some(cid) if cid != assignment.class_id => {
                return Err(HandlerErr::bad_params(format!(
                    "entry at index {}: student is not in the assignment's class",
                    i
                ))
                .with_details(json!({ "studentId": student_id })))
            }
            Some(_) => {}
        }

        entries.push(SaveEntry {
            student_id: student_id.to_string(),
            status,
            notes,
        });
    }
    Ok(entries)
}

fn attendance_sheet_open(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let assignment_id = get_required_str(params, "assignmentId")?;
    let date = match params.get("date").and_then(|v| v.as_str()) {
        Some(raw) => parse_date(raw)?,
        None => today(),
    };

    let assignment = load_assignment(conn, &assignment_id)?;
    require_owner(&assignment, &teacher_id)?;

    let roster = crate::ipc::helpers::active_roster(conn, &assignment.class_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT student_id, status, notes
             FROM attendances
             WHERE class_id = ? AND subject_id = ? AND date = ?",
        )
        .map_err(HandlerErr::db_query)?;
    let rows = stmt
        .query_map(
            (&assignment.class_id, &assignment.subject_id, date.to_string()),
            |r| {
                Ok(json!({
                    "studentId": r.get::<_, String>(0)?,
                    "status": r.get::<_, String>(1)?,
                    "notes": r.get::<_, Option<String>>(2)?
                }))
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({
        "assignment": assignment_json(&assignment),
        "date": date.to_string(),
        "students": roster_json(&roster),
        "rows": rows
    }))
}

fn attendance_save(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let assignment_id = get_required_str(params, "assignmentId")?;
    let date = parse_date(&get_required_str(params, "date")?)?;
    let Some(raw_entries) = params.get("entries").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing entries[]"));
    };

    let assignment = load_assignment(conn, &assignment_id)?;
    require_owner(&assignment, &teacher_id)?;
    let entries = validate_entries(conn, &assignment, raw_entries)?;

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    let now = now_rfc3339();
    for entry in &entries {
        let record_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO attendances(
                id, student_id, subject_id, class_id, teacher_id,
                date, status, notes, created_at, updated_at
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, subject_id, class_id, date) DO UPDATE SET
               teacher_id = excluded.teacher_id,
               status = excluded.status,
               notes = excluded.notes,
               updated_at = excluded.updated_at",
            rusqlite::params![
                &record_id,
                &entry.student_id,
                &assignment.subject_id,
                &assignment.class_id,
                &assignment.teacher_id,
                date.to_string(),
                entry.status.as_str(),
                &entry.notes,
                &now,
                &now
            ],
        )
        .map_err(|e| HandlerErr {
            code: "db_insert_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "attendances" })),
        })?;
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({ "saved": entries.len() }))
}

fn attendance_recap(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let assignment_id = get_required_str(params, "assignmentId")?;
    let end = match params.get("endDate").and_then(|v| v.as_str()) {
        Some(raw) => parse_date(raw)?,
        None => today(),
    };
    let start = end - Duration::days(RECAP_WINDOW_DAYS);

    let assignment = load_assignment(conn, &assignment_id)?;
    require_owner(&assignment, &teacher_id)?;

    let roster = crate::ipc::helpers::active_roster(conn, &assignment.class_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT date, student_id, status
             FROM attendances
             WHERE class_id = ? AND subject_id = ? AND date BETWEEN ? AND ?
             ORDER BY date, student_id",
        )
        .map_err(HandlerErr::db_query)?;
    let records: Vec<(String, String, String)> = stmt
        .query_map(
            (
                &assignment.class_id,
                &assignment.subject_id,
                start.to_string(),
                end.to_string(),
            ),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    // Per-date groups feed the matrix view; the ORDER BY keeps each group
    // contiguous.
    let mut by_date: Vec<serde_json::Value> = Vec::new();
    for (date, student_id, status) in &records {
        let row = json!({ "studentId": student_id, "status": status });
        match by_date.last_mut() {
            Some(group) if group["date"].as_str() == Some(date.as_str()) => {
                if let Some(rows) = group["rows"].as_array_mut() {
                    rows.push(row);
                }
            }
            _ => by_date.push(json!({ "date": date, "rows": [row] })),
        }
    }

    let statistics = calc::attendance_statistics(
        &roster,
        records
            .into_iter()
            .filter_map(|(_, student_id, status)| {
                AttendanceStatus::parse(&status).map(|s| (student_id, s))
            }),
    );
    let statistics = serde_json::to_value(statistics).map_err(|e| HandlerErr {
        code: "internal",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({
        "assignment": assignment_json(&assignment),
        "dateRange": { "start": start.to_string(), "end": end.to_string() },
        "byDate": by_date,
        "statistics": statistics
    }))
}

fn dispatch(
    state: &mut AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.sheetOpen" => Some(dispatch(state, req, attendance_sheet_open)),
        "attendance.save" => Some(dispatch(state, req, attendance_save)),
        "attendance.recap" => Some(dispatch(state, req, attendance_recap)),
        _ => None,
    }
}
