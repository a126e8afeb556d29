use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn teachers_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    let email = get_optional_str(params, "email")?;

    if let Some(email) = &email {
        let taken: Option<i64> = conn
            .query_row("SELECT 1 FROM teachers WHERE email = ?", [email], |r| r.get(0))
            .optional()
            .map_err(HandlerErr::db_query)?;
        if taken.is_some() {
            return Err(HandlerErr::bad_params("email already in use")
                .with_details(json!({ "email": email })));
        }
    }

    let teacher_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO teachers(id, name, email) VALUES(?, ?, ?)",
        (&teacher_id, &name, &email),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "teachers" })),
    })?;

    Ok(json!({ "teacherId": teacher_id, "name": name }))
}

fn subjects_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let code = get_required_str(params, "code")?;
    let code = code.trim().to_string();
    if name.trim().is_empty() || code.is_empty() {
        return Err(HandlerErr::bad_params("name and code must not be empty"));
    }
    let description = get_optional_str(params, "description")?;

    let taken: Option<i64> = conn
        .query_row("SELECT 1 FROM subjects WHERE code = ?", [&code], |r| r.get(0))
        .optional()
        .map_err(HandlerErr::db_query)?;
    if taken.is_some() {
        return Err(
            HandlerErr::bad_params("subject code already in use").with_details(json!({ "code": code }))
        );
    }

    let subject_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO subjects(id, name, code, description) VALUES(?, ?, ?, ?)",
        (&subject_id, name.trim(), &code, &description),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "subjects" })),
    })?;

    Ok(json!({ "subjectId": subject_id, "code": code }))
}

fn subjects_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, name, code, description FROM subjects ORDER BY name")
        .map_err(HandlerErr::db_query)?;
    let subjects = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "code": r.get::<_, String>(2)?,
                "description": r.get::<_, Option<String>>(3)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "subjects": subjects }))
}

fn classes_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    let grade_level = params
        .get("gradeLevel")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params("missing gradeLevel"))?;
    let academic_year = get_required_str(params, "academicYear")?;

    let class_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, name, grade_level, academic_year) VALUES(?, ?, ?, ?)",
        (&class_id, &name, grade_level, &academic_year),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "classes" })),
    })?;

    Ok(json!({ "classId": class_id, "name": name }))
}

fn classes_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    // Correlated subqueries keep the counts join-free.
    let mut stmt = conn
        .prepare(
            "SELECT
               c.id,
               c.name,
               c.grade_level,
               c.academic_year,
               (SELECT COUNT(*) FROM students s
                WHERE s.class_id = c.id AND s.status = 'active') AS active_students
             FROM classes c
             ORDER BY c.name",
        )
        .map_err(HandlerErr::db_query)?;
    let classes = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "gradeLevel": r.get::<_, i64>(2)?,
                "academicYear": r.get::<_, String>(3)?,
                "activeStudents": r.get::<_, i64>(4)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "classes": classes }))
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
        "teachers.create" => Some(dispatch(state, req, teachers_create)),
        "subjects.create" => Some(dispatch(state, req, subjects_create)),
        "subjects.list" => Some(dispatch(state, req, |c, _| subjects_list(c))),
        "classes.create" => Some(dispatch(state, req, classes_create)),
        "classes.list" => Some(dispatch(state, req, |c, _| classes_list(c))),
        _ => None,
    }
}
