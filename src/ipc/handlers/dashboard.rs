use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::{Duration, Local, Utc};
use rusqlite::Connection;
use serde_json::json;

const RECENT_WINDOW_DAYS: i64 = 7;

fn dashboard_open(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let academic_year = get_optional_str(params, "academicYear")?;

    let mut stmt = conn
        .prepare(
            "SELECT ts.id, ts.academic_year, s.name, s.code, c.name
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
                "subjectName": r.get::<_, String>(2)?,
                "subjectCode": r.get::<_, String>(3)?,
                "className": r.get::<_, String>(4)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let (total_classes, total_subjects): (i64, i64) = conn
        .query_row(
            "SELECT COUNT(DISTINCT class_id), COUNT(DISTINCT subject_id)
             FROM teacher_subjects
             WHERE teacher_id = ?1 AND (?2 IS NULL OR academic_year = ?2)",
            (&teacher_id, &academic_year),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(HandlerErr::db_query)?;

    // A student belongs to exactly one class, so no distinct needed here.
    let total_students: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM students
             WHERE status = 'active' AND class_id IN (
               SELECT DISTINCT class_id FROM teacher_subjects
               WHERE teacher_id = ?1 AND (?2 IS NULL OR academic_year = ?2)
             )",
            (&teacher_id, &academic_year),
            |r| r.get(0),
        )
        .map_err(HandlerErr::db_query)?;

    let today = Local::now().date_naive();
    let week_ago = today - Duration::days(RECENT_WINDOW_DAYS);
    let mut stmt = conn
        .prepare(
            "SELECT status, COUNT(*)
             FROM attendances
             WHERE teacher_id = ? AND date BETWEEN ? AND ?
             GROUP BY status",
        )
        .map_err(HandlerErr::db_query)?;
    let status_counts: Vec<(String, i64)> = stmt
        .query_map(
            (&teacher_id, week_ago.to_string(), today.to_string()),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    let mut recent_attendances = serde_json::Map::new();
    for (status, count) in status_counts {
        recent_attendances.insert(status, json!(count));
    }

    // Grade rows have no calendar date of their own; recency goes by the
    // last write timestamp. RFC 3339 UTC strings compare lexicographically.
    let grade_cutoff = (Utc::now() - Duration::days(RECENT_WINDOW_DAYS)).to_rfc3339();
    let recent_grades: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM grades
             WHERE teacher_id = ?1 AND updated_at >= ?2
               AND (?3 IS NULL OR academic_year = ?3)",
            (&teacher_id, &grade_cutoff, &academic_year),
            |r| r.get(0),
        )
        .map_err(HandlerErr::db_query)?;

    Ok(json!({
        "assignments": assignments,
        "stats": {
            "totalClasses": total_classes,
            "totalSubjects": total_subjects,
            "totalStudents": total_students,
            "recentAttendances": recent_attendances,
            "recentGrades": recent_grades
        }
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
        "dashboard.open" => Some(dispatch(state, req, dashboard_open)),
        _ => None,
    }
}
