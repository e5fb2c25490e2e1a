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
    let exe = env!("CARGO_BIN_EXE_marksheetd");
    let mut child = Command::new(exe)
        .env_remove("MARKSHEETD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn marksheetd");
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

fn request_err_code(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn str_at<'a>(v: &'a serde_json::Value, path: &[&str]) -> &'a str {
    let mut cur = v;
    for key in path {
        cur = cur.get(*key).unwrap_or_else(|| panic!("missing {} in {}", key, v));
    }
    cur.as_str().unwrap_or_else(|| panic!("{:?} not a string in {}", path, v))
}

fn f64_at(v: &serde_json::Value, path: &[&str]) -> f64 {
    let mut cur = v;
    for key in path {
        cur = cur.get(*key).unwrap_or_else(|| panic!("missing {} in {}", key, v));
    }
    cur.as_f64().unwrap_or_else(|| panic!("{:?} not a number in {}", path, v))
}

fn subjects_fixture() -> serde_json::Value {
    json!([
        {
            "subjectId": "math",
            "subjectName": "Mathematics",
            "theory": { "marksObtained": 72, "totalMarks": 80 },
            "practical": { "marksObtained": 20, "totalMarks": 20 },
            "attendance": { "present": 17, "total": 20, "percentage": 3 },
            "remarks": "Excellent"
        },
        {
            "subjectId": "eng",
            "subjectName": "English",
            "theory": { "marksObtained": 65, "totalMarks": 100 },
            "attendance": { "present": 18, "total": 20 }
        }
    ])
}

struct Fixture {
    _child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    class_id: String,
    student_id: String,
}

fn setup(prefix: &str) -> Fixture {
    let workspace = temp_dir(prefix);
    let (child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = request_ok(
        &mut stdin,
        &mut reader,
        "class",
        "classes.create",
        json!({ "name": "Grade 8", "section": "A" }),
    );
    let class_id = str_at(&class, &["classId"]).to_string();
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "student",
        "students.create",
        json!({ "classId": class_id, "name": "Asha Rao", "rollNo": "7" }),
    );
    let student_id = str_at(&student, &["studentId"]).to_string();
    Fixture {
        _child: child,
        stdin,
        reader,
        class_id,
        student_id,
    }
}

#[test]
fn create_edit_publish_finalize_flow() {
    let mut fx = setup("marksheetd-lifecycle");
    let (stdin, reader) = (&mut fx.stdin, &mut fx.reader);

    let created = request_ok(
        stdin,
        reader,
        "1",
        "marksheets.create",
        json!({
            "studentId": fx.student_id,
            "academicYear": "2025-26",
            "term": "Term 1",
            "examType": "Midterm",
            "subjects": subjects_fixture(),
            "conduct": { "discipline": "Good", "remarks": "Helpful" },
            "classTeacherRemarks": "Keep it up"
        }),
    );
    let marksheet_id = str_at(&created, &["marksheetId"]).to_string();
    let sheet = created.get("marksheet").cloned().expect("marksheet");
    assert_eq!(str_at(&sheet, &["classId"]), fx.class_id);
    assert_eq!(str_at(&sheet, &["status"]), "draft");
    // math 92/100 -> A+ (10), eng 65/100 -> B (7)
    assert_eq!(f64_at(&sheet, &["overall", "percentage"]), 78.5);
    assert_eq!(str_at(&sheet, &["overall", "grade"]), "B+");
    assert_eq!(f64_at(&sheet, &["overall", "cgpa"]), 8.5);
    // Caller-sent attendance percentage is ignored.
    assert_eq!(
        sheet["subjects"][0]["attendance"]["percentage"].as_f64(),
        Some(85.0)
    );
    assert_eq!(sheet["permissions"]["canEdit"].as_bool(), Some(true));
    assert_eq!(sheet["permissions"]["canFinalize"].as_bool(), Some(false));

    let updated = request_ok(
        stdin,
        reader,
        "2",
        "marksheets.update",
        json!({
            "marksheetId": marksheet_id,
            "patch": {
                "subjects": [{
                    "subjectId": "math",
                    "subjectName": "Mathematics",
                    "theory": { "marksObtained": 30, "totalMarks": 100 }
                }],
                "rank": 4,
                "totalStudents": 32
            }
        }),
    );
    assert_eq!(f64_at(&updated, &["marksheet", "overall", "percentage"]), 30.0);
    assert_eq!(str_at(&updated, &["marksheet", "overall", "grade"]), "F");
    assert_eq!(f64_at(&updated, &["marksheet", "overall", "cgpa"]), 0.0);
    assert_eq!(f64_at(&updated, &["marksheet", "overall", "rank"]), 4.0);

    let cleared = request_ok(
        stdin,
        reader,
        "2a",
        "marksheets.update",
        json!({ "marksheetId": marksheet_id, "patch": { "rank": null, "totalStudents": null } }),
    );
    assert!(cleared["marksheet"]["overall"].get("rank").is_none());
    assert!(cleared["marksheet"]["overall"].get("totalStudents").is_none());

    for (id, patch) in [
        ("2b", json!({ "status": "finalized" })),
        ("2c", json!({ "overall": { "percentage": 99 } })),
        ("2d", json!({ "rank": 0 })),
    ] {
        let code = request_err_code(
            stdin,
            reader,
            id,
            "marksheets.update",
            json!({ "marksheetId": marksheet_id, "patch": patch.clone() }),
        );
        assert_eq!(code, "invalid_input", "{}", patch);
    }
    let still_draft = request_ok(
        stdin,
        reader,
        "2e",
        "marksheets.get",
        json!({ "marksheetId": marksheet_id }),
    );
    assert_eq!(str_at(&still_draft, &["marksheet", "status"]), "draft");
    assert_eq!(f64_at(&still_draft, &["marksheet", "overall", "percentage"]), 30.0);

    let code = request_err_code(
        stdin,
        reader,
        "3",
        "marksheets.finalize",
        json!({ "marksheetId": marksheet_id }),
    );
    assert_eq!(code, "illegal_transition");

    let published = request_ok(
        stdin,
        reader,
        "4",
        "marksheets.publish",
        json!({ "marksheetId": marksheet_id }),
    );
    assert_eq!(str_at(&published, &["marksheet", "status"]), "published");
    assert!(published["marksheet"]["publishedAt"].is_string());
    assert_eq!(
        published["marksheet"]["permissions"]["canFinalize"].as_bool(),
        Some(true)
    );

    for (id, method, params) in [
        (
            "5",
            "marksheets.update",
            json!({ "marksheetId": marksheet_id, "patch": { "principalRemarks": "late edit" } }),
        ),
        ("6", "marksheets.delete", json!({ "marksheetId": marksheet_id })),
        ("7", "marksheets.publish", json!({ "marksheetId": marksheet_id })),
    ] {
        let code = request_err_code(stdin, reader, id, method, params);
        assert_eq!(code, "illegal_transition", "{}", method);
    }

    let finalized = request_ok(
        stdin,
        reader,
        "8",
        "marksheets.finalize",
        json!({ "marksheetId": marksheet_id }),
    );
    assert_eq!(str_at(&finalized, &["marksheet", "status"]), "finalized");

    for (id, method) in [("9", "marksheets.publish"), ("10", "marksheets.finalize")] {
        let code = request_err_code(stdin, reader, id, method, json!({ "marksheetId": marksheet_id }));
        assert_eq!(code, "illegal_transition", "{}", method);
    }

    let fetched = request_ok(
        stdin,
        reader,
        "11",
        "marksheets.get",
        json!({ "marksheetId": marksheet_id }),
    );
    assert_eq!(str_at(&fetched, &["marksheet", "status"]), "finalized");
    assert_eq!(str_at(&fetched, &["marksheet", "principalRemarks"]), "");
    let perms = &fetched["marksheet"]["permissions"];
    for key in ["canEdit", "canDelete", "canPublish", "canFinalize"] {
        assert_eq!(perms[key].as_bool(), Some(false), "{}", key);
    }
}

#[test]
fn drafts_can_be_deleted_and_are_hidden_from_students() {
    let mut fx = setup("marksheetd-visibility");
    let (stdin, reader) = (&mut fx.stdin, &mut fx.reader);

    let mut ids = Vec::new();
    for (i, term) in ["Term 1", "Term 2", "Term 3"].iter().enumerate() {
        let created = request_ok(
            stdin,
            reader,
            &format!("c{}", i),
            "marksheets.create",
            json!({
                "studentId": fx.student_id,
                "academicYear": "2025-26",
                "term": term,
                "examType": "Final",
                "subjects": subjects_fixture()
            }),
        );
        ids.push(str_at(&created, &["marksheetId"]).to_string());
    }

    let _ = request_ok(stdin, reader, "p", "marksheets.publish", json!({ "marksheetId": ids[0] }));
    let deleted = request_ok(stdin, reader, "d", "marksheets.delete", json!({ "marksheetId": ids[2] }));
    assert_eq!(deleted["deleted"].as_bool(), Some(true));

    let code = request_err_code(stdin, reader, "g", "marksheets.get", json!({ "marksheetId": ids[2] }));
    assert_eq!(code, "not_found");

    let all = request_ok(
        stdin,
        reader,
        "l1",
        "marksheets.list",
        json!({ "studentId": fx.student_id }),
    );
    assert_eq!(all["marksheets"].as_array().map(|a| a.len()), Some(2));

    let drafts = request_ok(
        stdin,
        reader,
        "l2",
        "marksheets.list",
        json!({ "classId": fx.class_id, "status": "Draft" }),
    );
    let drafts = drafts["marksheets"].as_array().cloned().unwrap_or_default();
    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0]["id"].as_str(), Some(ids[1].as_str()));

    let visible = request_ok(
        stdin,
        reader,
        "l3",
        "marksheets.listForStudent",
        json!({ "studentId": fx.student_id }),
    );
    let visible = visible["marksheets"].as_array().cloned().unwrap_or_default();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0]["id"].as_str(), Some(ids[0].as_str()));

    let code = request_err_code(
        stdin,
        reader,
        "l4",
        "marksheets.list",
        json!({ "status": "archived" }),
    );
    assert_eq!(code, "bad_params");
}

#[test]
fn invalid_marks_are_rejected_not_coerced() {
    let mut fx = setup("marksheetd-invalid-input");
    let (stdin, reader) = (&mut fx.stdin, &mut fx.reader);

    let base = |subjects: serde_json::Value| {
        json!({
            "studentId": fx.student_id,
            "academicYear": "2025-26",
            "term": "Term 1",
            "examType": "Unit Test",
            "subjects": subjects
        })
    };

    let over = base(json!([{
        "subjectId": "math",
        "subjectName": "Mathematics",
        "theory": { "marksObtained": 120, "totalMarks": 100 }
    }]));
    let resp = request(stdin, reader, "1", "marksheets.create", over);
    assert_eq!(resp["error"]["code"].as_str(), Some("invalid_input"));
    assert_eq!(
        resp["error"]["details"]["field"].as_str(),
        Some("subjects[0].theory.marksObtained")
    );

    let text = base(json!([{
        "subjectId": "math",
        "subjectName": "Mathematics",
        "theory": { "marksObtained": "abc", "totalMarks": 100 }
    }]));
    let code = request_err_code(stdin, reader, "2", "marksheets.create", text);
    assert_eq!(code, "invalid_input");

    let attendance = base(json!([{
        "subjectId": "math",
        "subjectName": "Mathematics",
        "theory": { "marksObtained": 10, "totalMarks": 100 },
        "attendance": { "present": 25, "total": 20 }
    }]));
    let code = request_err_code(stdin, reader, "3", "marksheets.create", attendance);
    assert_eq!(code, "invalid_input");

    let missing_student = json!({
        "studentId": "no-such-student",
        "academicYear": "2025-26",
        "term": "Term 1",
        "examType": "Unit Test",
        "subjects": []
    });
    let code = request_err_code(stdin, reader, "4", "marksheets.create", missing_student);
    assert_eq!(code, "not_found");

    let ok_sheet = request_ok(stdin, reader, "5", "marksheets.create", base(json!([])));
    assert_eq!(str_at(&ok_sheet, &["marksheet", "overall", "grade"]), "F");
    assert_eq!(f64_at(&ok_sheet, &["marksheet", "overall", "cgpa"]), 0.0);

    let code = request_err_code(stdin, reader, "6", "marksheets.create", base(json!([])));
    assert_eq!(code, "duplicate");

    let list = request_ok(stdin, reader, "7", "marksheets.list", json!({}));
    assert_eq!(list["marksheets"].as_array().map(|a| a.len()), Some(1));
}

#[test]
fn permissions_lookup_by_status_or_id() {
    let mut fx = setup("marksheetd-permissions");
    let (stdin, reader) = (&mut fx.stdin, &mut fx.reader);

    let published = request_ok(
        stdin,
        reader,
        "1",
        "marksheets.permissions",
        json!({ "status": "published" }),
    );
    assert_eq!(published["permissions"]["canFinalize"].as_bool(), Some(true));
    assert_eq!(published["permissions"]["canEdit"].as_bool(), Some(false));

    let created = request_ok(
        stdin,
        reader,
        "2",
        "marksheets.create",
        json!({
            "studentId": fx.student_id,
            "academicYear": "2025-26",
            "term": "Term 1",
            "examType": "Final",
            "subjects": subjects_fixture()
        }),
    );
    let by_id = request_ok(
        stdin,
        reader,
        "3",
        "marksheets.permissions",
        json!({ "marksheetId": str_at(&created, &["marksheetId"]) }),
    );
    assert_eq!(by_id["status"].as_str(), Some("draft"));
    assert_eq!(by_id["permissions"]["canPublish"].as_bool(), Some(true));
    assert_eq!(by_id["permissions"]["canDelete"].as_bool(), Some(true));

    let code = request_err_code(stdin, reader, "4", "marksheets.permissions", json!({}));
    assert_eq!(code, "bad_params");
}
