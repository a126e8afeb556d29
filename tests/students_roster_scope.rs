use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_sekolahd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn sekolahd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

struct School {
    teacher_id: String,
    class_id: String,
    assignment_id: String,
    student_ids: Vec<String>,
}

fn seed_school(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
    students: &[(&str, &str)],
) -> School {
    request_ok(
        stdin,
        reader,
        "seed-ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let teacher = request_ok(
        stdin,
        reader,
        "seed-t",
        "teachers.create",
        json!({ "name": "Ibu Mega" }),
    );
    let teacher_id = teacher["teacherId"].as_str().expect("teacherId").to_string();

    let subject = request_ok(
        stdin,
        reader,
        "seed-s",
        "subjects.create",
        json!({ "name": "Sejarah", "code": "SEJ" }),
    );
    let subject_id = subject["subjectId"].as_str().expect("subjectId").to_string();

    let class = request_ok(
        stdin,
        reader,
        "seed-c",
        "classes.create",
        json!({ "name": "11B", "gradeLevel": 11, "academicYear": "2024/2025" }),
    );
    let class_id = class["classId"].as_str().expect("classId").to_string();

    let mut student_ids = Vec::new();
    for (i, (nis, name)) in students.iter().enumerate() {
        let created = request_ok(
            stdin,
            reader,
            &format!("seed-st{}", i),
            "students.create",
            json!({ "classId": class_id, "nis": nis, "name": name }),
        );
        student_ids.push(created["studentId"].as_str().expect("studentId").to_string());
    }

    let assignment = request_ok(
        stdin,
        reader,
        "seed-a",
        "assignments.create",
        json!({
            "teacherId": teacher_id,
            "subjectId": subject_id,
            "classId": class_id,
            "academicYear": "2024/2025"
        }),
    );
    let assignment_id = assignment["assignmentId"]
        .as_str()
        .expect("assignmentId")
        .to_string();

    School {
        teacher_id,
        class_id,
        assignment_id,
        student_ids,
    }
}

#[test]
fn inactive_students_leave_the_roster_and_the_recap() {
    let workspace = temp_dir("sekolah-roster-scope");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let school = seed_school(
        &mut stdin,
        &mut reader,
        &workspace,
        &[("6001", "Kiki"), ("6002", "Lina")],
    );
    let kiki = school.student_ids[0].clone();
    let lina = school.student_ids[1].clone();

    request_ok(
        &mut stdin,
        &mut reader,
        "mark",
        "attendance.save",
        json!({
            "teacherId": school.teacher_id,
            "assignmentId": school.assignment_id,
            "date": "2025-03-03",
            "entries": [
                { "studentId": kiki, "status": "hadir" },
                { "studentId": lina, "status": "hadir" }
            ]
        }),
    );

    request_ok(
        &mut stdin,
        &mut reader,
        "deactivate",
        "students.setStatus",
        json!({ "studentId": lina, "status": "inactive" }),
    );

    let sheet = request_ok(
        &mut stdin,
        &mut reader,
        "sheet",
        "attendance.sheetOpen",
        json!({
            "teacherId": school.teacher_id,
            "assignmentId": school.assignment_id,
            "date": "2025-03-04"
        }),
    );
    let roster = sheet["students"].as_array().expect("students");
    assert_eq!(roster.len(), 1);
    assert_eq!(roster[0]["name"].as_str(), Some("Kiki"));

    // Recap statistics follow the active roster; Lina's old record drops out.
    let recap = request_ok(
        &mut stdin,
        &mut reader,
        "recap",
        "attendance.recap",
        json!({
            "teacherId": school.teacher_id,
            "assignmentId": school.assignment_id,
            "endDate": "2025-03-20"
        }),
    );
    let stats = recap["statistics"].as_array().expect("statistics");
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0]["name"].as_str(), Some("Kiki"));
    assert_eq!(stats[0]["hadir"].as_i64(), Some(1));
}

#[test]
fn list_filters_by_status_and_reports_it() {
    let workspace = temp_dir("sekolah-roster-list");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let school = seed_school(
        &mut stdin,
        &mut reader,
        &workspace,
        &[("6001", "Kiki"), ("6002", "Lina"), ("6003", "Mira")],
    );
    let lina = school.student_ids[1].clone();
    let mira = school.student_ids[2].clone();

    request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "students.setStatus",
        json!({ "studentId": lina, "status": "graduated" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "s2",
        "students.setStatus",
        json!({ "studentId": mira, "status": "inactive" }),
    );

    let all = request_ok(
        &mut stdin,
        &mut reader,
        "list-all",
        "students.list",
        json!({ "classId": school.class_id }),
    );
    assert_eq!(all["students"].as_array().map(|s| s.len()), Some(3));

    let active = request_ok(
        &mut stdin,
        &mut reader,
        "list-active",
        "students.list",
        json!({ "classId": school.class_id, "status": "active" }),
    );
    let active = active["students"].as_array().expect("students");
    assert_eq!(active.len(), 1);
    assert_eq!(active[0]["name"].as_str(), Some("Kiki"));
    assert_eq!(active[0]["status"].as_str(), Some("active"));

    let graduated = request_ok(
        &mut stdin,
        &mut reader,
        "list-grad",
        "students.list",
        json!({ "classId": school.class_id, "status": "graduated" }),
    );
    let graduated = graduated["students"].as_array().expect("students");
    assert_eq!(graduated.len(), 1);
    assert_eq!(graduated[0]["name"].as_str(), Some("Lina"));
}

#[test]
fn set_status_rejects_unknown_student_and_bad_token() {
    let workspace = temp_dir("sekolah-roster-status");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let school = seed_school(&mut stdin, &mut reader, &workspace, &[("6001", "Kiki")]);
    let kiki = school.student_ids[0].clone();

    let missing = request(
        &mut stdin,
        &mut reader,
        "missing",
        "students.setStatus",
        json!({ "studentId": "no-such-id", "status": "inactive" }),
    );
    assert_eq!(missing["error"]["code"].as_str(), Some("not_found"));

    let bad = request(
        &mut stdin,
        &mut reader,
        "bad",
        "students.setStatus",
        json!({ "studentId": kiki, "status": "expelled" }),
    );
    assert_eq!(bad["error"]["code"].as_str(), Some("bad_params"));
}
