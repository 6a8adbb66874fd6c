use serde_json::json;

#[macro_use]
extern crate lazy_static;

mod common;

use common::graphql::*;

#[test]
fn test_department_tank_crud() {
    let mut tester = init_app();

    tester.login_root();
    let department_id = tester.create_random_department();

    // Add tank
    let res = tester.submit(query(r#"mutation addTank($id: Int!) {
        addTank(departmentId: $id, data: { number: "522", bblPerMeter: 1200, minLevel: 2, maxLevel: 18 }) {
            id, departmentId, number, capacity, enabled
        }
    }"#).add_variable("id", department_id));

    let tank_id = res["id"].to_i64();
    assert_eq!(res["departmentId"], department_id);
    assert_eq!(res["number"], "522");
    assert_eq!(res["capacity"].to_f64(), 19200.0);
    assert_eq!(res["enabled"], true);

    // Set the product
    let res = tester.submit(query(r#"mutation updateTank($id: Int!) {
        updateTank(id: $id, data: { product: "LSFO" }) { id, product }
    }"#).add_variable("id", tank_id));
    assert_eq!(res, json!({ "id": tank_id, "product": "LSFO" }));

    // Invalid calibration is rejected
    tester.submit_raw(query(r#"mutation addBadTank($id: Int!) {
        addTank(departmentId: $id, data: { number: "523", bblPerMeter: 1200, minLevel: 18, maxLevel: 2 }) { id }
    }"#).add_variable("id", department_id))
        .expect_service_error("BAD_REQUEST");

    // Cleanup, tanks go with the department
    tester.submit(query(r#"mutation deleteDepartment($id: Int!) {
        deleteDepartment(id: $id)
    }"#).add_variable("id", department_id));

    tester.submit_raw(query(r#"query getTank($id: Int!) {
        tank(id: $id) { id }
    }"#).add_variable("id", tank_id))
        .expect_service_error("NOT_FOUND");
}

#[test]
fn test_tank_calc() {
    let mut tester = init_app();

    tester.login_root();
    let department_id = tester.create_random_department();

    let tank_id = tester.submit(query(r#"mutation addTank($id: Int!) {
        addTank(departmentId: $id, data: { number: "700", bblPerMeter: 1200, minLevel: 2, maxLevel: 18 }) { id }
    }"#).add_variable("id", department_id))["id"].to_i64();

    // At 10m the pumpable and ullage sides are both 9600 bbl
    let res = tester.submit(query(r#"query calc($id: Int!) {
        tankCalc(tankId: $id, level: 10, targetType: PUMPABLE, targetValue: 4800, flowRate: 600, flowUnit: BARRELS_PER_HOUR) {
            availablePumpable, currentUllage, estimatedLevel, volumeDifference, hours, highLevel
        }
    }"#).add_variable("id", tank_id));

    assert_eq!(res["availablePumpable"].to_f64(), 9600.0);
    assert_eq!(res["currentUllage"].to_f64(), 9600.0);
    assert_eq!(res["estimatedLevel"].to_f64(), 6.0);
    assert_eq!(res["volumeDifference"].to_f64(), -4800.0);
    assert_eq!(res["hours"].to_f64(), 8.0);
    assert_eq!(res["highLevel"], false);

    // Reaching for the roof flags the high level alarm
    let res = tester.submit(query(r#"query calc($id: Int!) {
        tankCalc(tankId: $id, level: 10, targetType: LEVEL, targetValue: 17.8) { highLevel }
    }"#).add_variable("id", tank_id));
    assert_eq!(res["highLevel"], true);

    tester.submit(query(r#"mutation deleteDepartment($id: Int!) {
        deleteDepartment(id: $id)
    }"#).add_variable("id", department_id));

    // A vanished tank is reported as missing, even to an admin
    tester.submit_raw(query(r#"query calc($id: Int!) {
        tankCalc(tankId: $id, level: 10, targetType: LEVEL, targetValue: 5) { hours }
    }"#).add_variable("id", tank_id))
        .expect_service_error("NOT_FOUND");

    tester.submit_raw(query(r#"mutation addLive($id: Int!) {
        addLiveTank(tankId: $id, data: { level: 10, targetType: ULLAGE, targetValue: 4800, flowRate: 600, flowUnit: BARRELS_PER_HOUR }) { id }
    }"#).add_variable("id", tank_id))
        .expect_service_error("NOT_FOUND");
}

#[test]
fn test_permission_view() {
    let mut tester = init_app();
    let mut user_tester = tester.clone();

    tester.login_root();

    let department_ids: Vec<i64> = (0..3).map(|_| tester.create_random_department()).collect();

    let (user_id, user_name) = tester.create_random_user("123");

    tester.submit(query(r#"mutation giveAccess($userId: Int!, $departmentIds: [Int!]!) {
        giveUserAccess(userId: $userId, departmentIds: $departmentIds)
    }"#).add_variable("userId", user_id).add_variable("departmentIds", &department_ids[0..=1]));

    user_tester.login(&user_name, "123");
    let res = user_tester.submit(query(r#"query getDepartments($ids: [Int!]) {
        departments(ids: $ids) { id }
    }"#).add_variable("ids", &department_ids[0..=1]));
    assert_eq!(res, json!([
        {"id": department_ids[0]},
        {"id": department_ids[1]}
    ]));

    let res = user_tester.submit_raw(query(r#"query getSingleDepartment($id: Int!) {
        department (id: $id) { id }
    }"#).add_variable("id", department_ids[2]));

    res.expect_service_error("NOT_FOUND");

    // Access revocation takes effect immediately
    tester.submit(query(r#"mutation revokeAccess($userId: Int!, $departmentIds: [Int!]!) {
        revokeUserAccess(userId: $userId, departmentIds: $departmentIds)
    }"#).add_variable("userId", user_id).add_variable("departmentIds", vec![department_ids[1]]));

    let res = user_tester.submit_raw(query(r#"query getSingleDepartment($id: Int!) {
        department (id: $id) { id }
    }"#).add_variable("id", department_ids[1]));
    res.expect_service_error("NOT_FOUND");

    // Cleanup
    for id in department_ids {
        tester.submit(query(r#"mutation deleteDepartment($id: Int!) {
            deleteDepartment(id: $id)
        }"#).add_variable("id", id));
    }
    tester.submit(query(r#"mutation deleteUser($id: Int!) {
        deleteUser(id: $id)
    }"#).add_variable("id", user_id));
}

#[test]
fn test_password_change_invalidates_sessions() {
    let mut tester = init_app();
    let mut first_login = tester.clone();
    let mut second_login = tester.clone();

    tester.login_root();
    let (user_id, user_name) = tester.create_random_user("oldpassword");

    first_login.login(&user_name, "oldpassword");
    second_login.login(&user_name, "oldpassword");

    // Both sessions work
    first_login.submit(query(r#"query { departments { id } }"#));
    second_login.submit(query(r#"query { departments { id } }"#));

    // First session changes the password and stays logged in
    first_login.submit(query(r#"mutation changePassword($id: Int!) {
        updateUser(id: $id, data: { password: "newpassword" }) { id }
    }"#).add_variable("id", user_id));
    first_login.submit(query(r#"query { departments { id } }"#));

    // The second session is gone
    second_login.submit_raw(query(r#"query { departments { id } }"#))
        .expect_service_error("LOGIN_REQUIRED");

    // And the old password no longer works
    second_login.submit_raw(query(r#"mutation login($auth: AuthInput!) { login(auth: $auth) { id } }"#)
        .add_variable("auth", json!({ "username": &user_name, "password": "oldpassword" })))
        .expect_service_error("WRONG_PASSWORD");

    tester.submit(query(r#"mutation deleteUser($id: Int!) {
        deleteUser(id: $id)
    }"#).add_variable("id", user_id));
}

#[test]
fn test_session_lifecycle() {
    let mut tester = init_app();
    let mut user_tester = tester.clone();

    tester.login_root();
    let (user_id, user_name) = tester.create_random_user("123");

    user_tester.login(&user_name, "123");

    let res = user_tester.submit(query(r#"query { sessionInfo { expiringSoon } }"#));
    assert_eq!(res["expiringSoon"], false);

    user_tester.submit(query(r#"mutation { renewSession { expiringSoon } }"#));

    user_tester.submit(query(r#"mutation { logout }"#));
    user_tester.submit_raw(query(r#"query { departments { id } }"#))
        .expect_service_error("LOGIN_REQUIRED");

    tester.submit(query(r#"mutation deleteUser($id: Int!) {
        deleteUser(id: $id)
    }"#).add_variable("id", user_id));
}

#[test]
fn test_device_binding() {
    let mut tester = init_app();

    tester.login_root();
    let (user_id, user_name) = tester.create_random_user("123");

    let login_with_device = r#"mutation login($auth: AuthInput!, $device: DeviceDescriptor!) {
        login(auth: $auth, device: $device) { id }
    }"#;
    let auth = json!({ "username": &user_name, "password": "123" });
    let device = |platform: &str| json!({
        "screenWidth": 1920,
        "screenHeight": 1080,
        "pixelRatio": 1.0,
        "userAgent": "Mozilla/5.0 test",
        "language": "en-US",
        "platform": platform,
        "timezone": "Asia/Kuwait"
    });

    let mut device_tester = tester.clone();
    for platform in &["Win32", "Linux x86_64", "MacIntel"] {
        device_tester.submit(query(login_with_device)
            .add_variable("auth", auth.clone())
            .add_variable("device", device(platform)));
    }

    // A known device never counts against the bound
    device_tester.submit(query(login_with_device)
        .add_variable("auth", auth.clone())
        .add_variable("device", device("Win32")));

    // A fourth distinct device is rejected
    device_tester.submit_raw(query(login_with_device)
        .add_variable("auth", auth.clone())
        .add_variable("device", device("iPhone")))
        .expect_service_error("DEVICE_NOT_AUTHORIZED");

    let res = tester.submit(query(r#"query getUser($id: Int!) {
        user(id: $id) { devices { id } }
    }"#).add_variable("id", user_id));
    assert_eq!(res["devices"].as_array().unwrap().len(), 3);

    tester.submit(query(r#"mutation deleteUser($id: Int!) {
        deleteUser(id: $id)
    }"#).add_variable("id", user_id));
}

#[test]
fn test_live_tank_and_reminders() {
    let mut tester = init_app();

    tester.login_root();
    let department_id = tester.create_random_department();

    let tank_id = tester.submit(query(r#"mutation addTank($id: Int!) {
        addTank(departmentId: $id, data: { number: "801", bblPerMeter: 1200, minLevel: 2, maxLevel: 18 }) { id }
    }"#).add_variable("id", department_id))["id"].to_i64();

    // Put the tank on the live board
    let res = tester.submit(query(r#"mutation addLive($id: Int!) {
        addLiveTank(tankId: $id, data: { level: 10, targetType: ULLAGE, targetValue: 4800, flowRate: 600, flowUnit: BARRELS_PER_HOUR }) {
            id, tankId, level, status, finishAt
        }
    }"#).add_variable("id", tank_id));

    let live_id = res["id"].to_i64();
    assert_eq!(res["tankId"], tank_id);
    assert_eq!(res["level"].to_f64(), 10.0);
    assert_eq!(res["status"], "active");
    assert!(res["finishAt"].is_number());
    let finish_estimate = res["finishAt"].to_f64();

    // A zero flow rate cannot produce a finish time
    tester.submit_raw(query(r#"mutation addLive($id: Int!) {
        addLiveTank(tankId: $id, data: { level: 10, targetType: ULLAGE, targetValue: 4800, flowRate: 0, flowUnit: BARRELS_PER_HOUR }) { id }
    }"#).add_variable("id", tank_id))
        .expect_service_error("BAD_REQUEST");

    // A pure status change keeps the stored finish estimate
    let res = tester.submit(query(r#"mutation updateLive($id: Int!) {
        updateLiveTank(id: $id, data: { status: "done" }) { id, status, finishAt }
    }"#).add_variable("id", live_id));
    assert_eq!(res["status"], "done");
    assert_eq!(res["finishAt"].to_f64(), finish_estimate);

    tester.submit_raw(query(r#"mutation updateLive($id: Int!) {
        updateLiveTank(id: $id, data: { status: "sideways" }) { id }
    }"#).add_variable("id", live_id))
        .expect_service_error("BAD_REQUEST");

    tester.submit(query(r#"mutation removeLive($id: Int!) {
        removeLiveTank(id: $id)
    }"#).add_variable("id", live_id));

    // Schedule a reminder for tomorrow. NaiveDateTime travels as a
    // unix timestamp over GraphQL.
    let finish_at = (chrono::Utc::now() + chrono::Duration::days(1)).timestamp() as f64;

    let res = tester.submit(query(r#"mutation schedule($id: Int!, $finishAt: NaiveDateTime!) {
        scheduleReminder(tankId: $id, data: { finishAt: $finishAt, intervals: [15, 30, 15] }) {
            id, active, intervals, sentIntervals
        }
    }"#).add_variable("id", tank_id).add_variable("finishAt", finish_at));

    let reminder_id = res["id"].to_i64();
    assert_eq!(res["active"], true);
    assert_eq!(res["intervals"], json!([30, 15]));// sorted, deduplicated
    assert_eq!(res["sentIntervals"], json!([]));

    // Validation
    tester.submit_raw(query(r#"mutation schedule($id: Int!, $finishAt: NaiveDateTime!) {
        scheduleReminder(tankId: $id, data: { finishAt: $finishAt, intervals: [] }) { id }
    }"#).add_variable("id", tank_id).add_variable("finishAt", finish_at))
        .expect_service_error("BAD_REQUEST");

    tester.submit_raw(query(r#"mutation schedule($id: Int!, $finishAt: NaiveDateTime!) {
        scheduleReminder(tankId: $id, data: { finishAt: $finishAt, intervals: [30], phoneNumber: "12345" }) { id }
    }"#).add_variable("id", tank_id).add_variable("finishAt", finish_at))
        .expect_service_error("BAD_REQUEST");

    tester.submit(query(r#"mutation cancel($id: Int!) {
        cancelReminder(id: $id)
    }"#).add_variable("id", reminder_id));

    let res = tester.submit(query(r#"query { reminders(activeOnly: true) { id } }"#));
    assert!(!res.as_array().unwrap().iter().any(|x| x["id"] == reminder_id));

    tester.submit(query(r#"mutation deleteDepartment($id: Int!) {
        deleteDepartment(id: $id)
    }"#).add_variable("id", department_id));
}

#[test]
fn test_sweep_fires_overlapping_intervals() {
    let mut tester = init_app();

    tester.login_root();
    let department_id = tester.create_random_department();

    let tank_id = tester.submit(query(r#"mutation addTank($id: Int!) {
        addTank(departmentId: $id, data: { number: "802", bblPerMeter: 1200, minLevel: 2, maxLevel: 18 }) { id }
    }"#).add_variable("id", department_id))["id"].to_i64();

    // Both marks fall inside the very first sweep window
    let finish_at = (chrono::Utc::now() + chrono::Duration::minutes(15)).timestamp() as f64;
    let reminder_id = tester.submit(query(r#"mutation schedule($id: Int!, $finishAt: NaiveDateTime!) {
        scheduleReminder(tankId: $id, data: { finishAt: $finishAt, intervals: [15, 14] }) { id }
    }"#).add_variable("id", tank_id).add_variable("finishAt", finish_at))["id"].to_i64();

    let (status, body) = tester.submit_rest("POST", "/api/cron/check_reminders", None, Some(TEST_CRON_SECRET));
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);

    // One sweep fires both intervals and retires the reminder
    let res = tester.submit(query(r#"query { reminders { id, active, sentIntervals } }"#));
    let row = res.as_array().unwrap().iter()
        .find(|x| x["id"] == reminder_id)
        .expect("reminder is gone")
        .clone();
    assert_eq!(row["sentIntervals"], json!([15, 14]));
    assert_eq!(row["active"], false);

    tester.submit(query(r#"mutation deleteDepartment($id: Int!) {
        deleteDepartment(id: $id)
    }"#).add_variable("id", department_id));
}

#[test]
fn test_activity_log() {
    let mut tester = init_app();

    tester.login_root();
    let department_id = tester.create_random_department();

    tester.submit(query(r#"mutation renameForAudit($id: Int!) {
        updateDepartment(id: $id, data: { name: "Renamed department" }) { id }
    }"#).operation("renameForAudit").add_variable("id", department_id));

    // The log keeps the action, the caller and the operation name
    let res = tester.submit(query(r#"query { activities(limit: 500) { action, username, page } }"#));
    let entry = res.as_array().unwrap().iter()
        .find(|x| x["page"] == "renameForAudit")
        .expect("activity row is missing")
        .clone();
    assert_eq!(entry["action"], "update_department");
    assert_eq!(entry["username"], "root");

    tester.submit(query(r#"mutation deleteDepartment($id: Int!) {
        deleteDepartment(id: $id)
    }"#).add_variable("id", department_id));
}

#[test]
fn test_rest_endpoints() {
    let mut tester = init_app();

    // Cron sweep requires the shared secret
    let (status, _) = tester.submit_rest("POST", "/api/cron/check_reminders", None, None);
    assert_eq!(status, 401);

    let (status, _) = tester.submit_rest("POST", "/api/cron/check_reminders", None, Some("wrong"));
    assert_eq!(status, 401);

    let (status, body) = tester.submit_rest("POST", "/api/cron/check_reminders", None, Some(TEST_CRON_SECRET));
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);

    // Phone number validation happens before any Twilio call
    let (status, body) = tester.submit_rest(
        "POST", "/api/send_otp",
        Some(json!({ "phoneNumber": "12345" })),
        None,
    );
    assert_eq!(status, 400);
    assert!(body["error"].is_string());

    let (status, _) = tester.submit_rest(
        "POST", "/api/verify_otp",
        Some(json!({ "phoneNumber": "+96512345678", "code": "12ab56" })),
        None,
    );
    assert_eq!(status, 400);

    let (status, _) = tester.submit_rest(
        "POST", "/api/send_whatsapp",
        Some(json!({ "to": "", "message": "" })),
        None,
    );
    assert_eq!(status, 400);

    // Wrong verb
    let (status, _) = tester.submit_rest("GET", "/api/send_otp", None, None);
    assert_eq!(status, 405);
}
