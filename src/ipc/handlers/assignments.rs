use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn row_exists(conn: &Connection, table: &str, id: &str) -> Result<bool, HandlerErr> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    conn.query_row(&sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
        .map_err(HandlerErr::db_query)
}

fn assignments_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let subject_id = get_required_str(params, "subjectId")?;
    let class_id = get_required_str(params, "classId")?;
    let academic_year = get_required_str(params, "academicYear")?;

    if !row_exists(conn, "teachers", &teacher_id)? {
        return Err(HandlerErr::not_found("teacher not found"));
    }
    if !row_exists(conn, "subjects", &subject_id)? {
        return Err(HandlerErr::not_found("subject not found"));
    }
    if !row_exists(conn, "classes", &class_id)? {
        return Err(HandlerErr::not_found("class not found"));
    }

    let duplicate: Option<String> = conn
        .query_row(
            "SELECT id FROM teacher_subjects
             WHERE teacher_id = ? AND subject_id = ? AND class_id = ? AND academic_year = ?",
            (&teacher_id, &subject_id, &class_id, &academic_year),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    if let Some(existing) = duplicate {
        return Err(HandlerErr::bad_params("assignment already exists")
            .with_details(json!({ "assignmentId": existing })));
    }

    let assignment_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO teacher_subjects(id, teacher_id, subject_id, class_id, academic_year)
         VALUES(?, ?, ?, ?, ?)",
        (&assignment_id, &teacher_id, &subject_id, &class_id, &academic_year),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "teacher_subjects" })),
    })?;

    Ok(json!({ "assignmentId": assignment_id }))
}

fn assignments_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let academic_year = get_optional_str(params, "academicYear")?;

    let mut stmt = conn
        .prepare(
            "SELECT ts.id, ts.academic_year,
                    s.id, s.name, s.code,
                    c.id, c.name,
                    (SELECT COUNT(*) FROM students st
                     WHERE st.class_id = ts.class_id AND st.status = 'active') AS roster_size
             FROM teacher_subjects ts
             JOIN subjects s ON s.id = ts.subject_id
             JOIN classes c ON c.id = ts.class_id
             WHERE ts.teacher_id = ?1 AND (?2 IS NULL OR ts.academic_year = ?2)
             ORDER BY c.name, s.name",
        )
        .map_err(HandlerErr::db_query)?;
    let assignments = stmt
        .query_map((&teacher_id, &academic_year), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "academicYear": r.get::<_, String>(1)?,
                "subject": {
                    "id": r.get::<_, String>(2)?,
                    "name": r.get::<_, String>(3)?,
                    "code": r.get::<_, String>(4)?
                },
                "schoolClass": {
                    "id": r.get::<_, String>(5)?,
                    "name": r.get::<_, String>(6)?
                },
                "rosterSize": r.get::<_, i64>(7)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({ "assignments": assignments }))
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
        "assignments.create" => Some(dispatch(state, req, assignments_create)),
        "assignments.list" => Some(dispatch(state, req, assignments_list)),
        _ => None,
    }
}
