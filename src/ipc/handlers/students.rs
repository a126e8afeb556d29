use crate::calc::StudentStatus;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_str, get_required_str, now_rfc3339, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn class_exists(conn: &Connection, class_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::db_query)
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let nis = get_required_str(params, "nis")?;
    let nis = nis.trim().to_string();
    let name = get_required_str(params, "name")?;
    let name = name.trim().to_string();
    if nis.is_empty() || name.is_empty() {
        return Err(HandlerErr::bad_params("nis and name must not be empty"));
    }

    let gender = get_optional_str(params, "gender")?;
    if let Some(g) = &gender {
        if g != "L" && g != "P" {
            return Err(HandlerErr::bad_params("gender must be L or P")
                .with_details(json!({ "gender": g })));
        }
    }
    let birth_date = get_optional_str(params, "birthDate")?;
    if let Some(d) = &birth_date {
        if chrono::NaiveDate::parse_from_str(d, "%Y-%m-%d").is_err() {
            return Err(HandlerErr::bad_params("birthDate must be YYYY-MM-DD"));
        }
    }
    let birth_place = get_optional_str(params, "birthPlace")?;
    let address = get_optional_str(params, "address")?;
    let phone = get_optional_str(params, "phone")?;

    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr::not_found("class not found"));
    }

    let taken: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE nis = ?", [&nis], |r| r.get(0))
        .optional()
        .map_err(HandlerErr::db_query)?;
    if taken.is_some() {
        return Err(HandlerErr::bad_params("nis already in use").with_details(json!({ "nis": nis })));
    }

    let student_id = Uuid::new_v4().to_string();
    let now = now_rfc3339();
    conn.execute(
        "INSERT INTO students(
            id, nis, name, class_id, gender, birth_date, birth_place,
            address, phone, status, created_at, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, 'active', ?, ?)",
        rusqlite::params![
            &student_id,
            &nis,
            &name,
            &class_id,
            &gender,
            &birth_date,
            &birth_place,
            &address,
            &phone,
            &now,
            &now
        ],
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "students" })),
    })?;

    Ok(json!({ "studentId": student_id, "nis": nis, "name": name }))
}

fn students_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let status = match get_optional_str(params, "status")? {
        None => None,
        Some(raw) => Some(
            StudentStatus::parse(&raw)
                .ok_or_else(|| {
                    HandlerErr::bad_params("status must be one of: active, inactive, graduated")
                        .with_details(json!({ "status": raw }))
                })?
                .as_str(),
        ),
    };

    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr::not_found("class not found"));
    }

    let mut stmt = conn
        .prepare(
            "SELECT id, nis, name, status
             FROM students
             WHERE class_id = ?1 AND (?2 IS NULL OR status = ?2)
             ORDER BY name",
        )
        .map_err(HandlerErr::db_query)?;
    let students = stmt
        .query_map((&class_id, status), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "nis": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
                "status": r.get::<_, String>(3)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({ "students": students }))
}

fn students_set_status(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let raw = get_required_str(params, "status")?;
    let status = StudentStatus::parse(&raw).ok_or_else(|| {
        HandlerErr::bad_params("status must be one of: active, inactive, graduated")
            .with_details(json!({ "status": raw }))
    })?;

    let updated = conn
        .execute(
            "UPDATE students SET status = ?, updated_at = ? WHERE id = ?",
            (status.as_str(), now_rfc3339(), &student_id),
        )
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "students" })),
        })?;
    if updated == 0 {
        return Err(HandlerErr::not_found("student not found"));
    }

    Ok(json!({ "studentId": student_id, "status": status.as_str() }))
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
        "students.create" => Some(dispatch(state, req, students_create)),
        "students.list" => Some(dispatch(state, req, students_list)),
        "students.setStatus" => Some(dispatch(state, req, students_set_status)),
        _ => None,
    }
}
