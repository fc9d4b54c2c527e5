//! End-to-end portal flows against a mock portal.

use ims_portal::auth::{AuthState, AuthenticationFlow};
use ims_portal::http::PortalHttp;
use ims_portal::{
    AttendanceQuery, AuthOutcome, CaptchaChallenge, CaptchaSolver, Credentials, FixedSolver,
    LinkTable, PortalClient, PortalConfig, PortalError, PortalResult, SessionState, SessionStore,
    SessionUpdate,
};
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

// ── Portal pages ────────────────────────────────────────────────────────────

const LOGIN_PAGE: &str = r#"
<html><body>
  <form name="loginform" method="post" action="student_login.php">
    <input type="text" name="uid"><input type="password" name="pwd">
    <img id="captchaimg" src="captcha.php?r=31337">
    <input type="hidden" id="HRAND_NUM" name="HRAND_NUM" value="4242">
  </form>
</body></html>
"#;

const LOGIN_OK: &str = r#"
<html><body>
  <a href="profile.php?sid=abc">Profile</a>
  <a href="menu.php?sid=abc">My Activities</a>
  <a href="logout.php">Logout</a>
</body></html>
"#;

const LOGIN_FAILED: &str = r#"
<html><body>Invalid Captcha. Please try again.
  <a href="profile.php?sid=stale">Profile</a>
</body></html>
"#;

const MENU: &str = r##"
<html><body>
  <a href="#">Academics</a>
  <a href="att.php">Attendance Report</a>
  <a href="courses.php">Current Semester Registered Courses.</a>
  <a href="transcript.php">tudent Transcript (CBCS)(NSIT)</a>
</body></html>
"##;

const PROFILE: &str = r#"
<table>
  <tr><td>Student ID</td><td>2021UCS1234</td></tr>
  <tr><td>Student Name</td><td>Asha Verma</td></tr>
  <tr><td>DOB</td><td>01-02-2003</td></tr>
  <tr><td>Gender</td><td>Female</td></tr>
  <tr><td>Category</td><td>GEN</td></tr>
  <tr><td>Branch Name</td><td>COE</td></tr>
  <tr><td>Degree</td><td>B.Tech</td></tr>
  <tr><td>Section</td><td>2</td></tr>
</table>
"#;

const EXPIRED: &str = "<html><body><b>Session expired</b>. Please login again.</body></html>";

const ATTENDANCE_FORM: &str = r#"
<form method="post">
  <input type="hidden" id="enc_year" name="enc_year" value="EY2023">
  <input type="hidden" id="enc_sem" name="enc_sem" value="ES1">
  <input type="hidden" name="recentitycode" value="2021UCS1234">
  <input type="hidden" name="dept" value="COE">
  <input type="hidden" name="degree" value="B.Tech">
</form>
"#;

const ATTENDANCE_REPORT: &str = r#"
<table>
  <tr><th>Subject</th><th>Held</th><th>Attended</th></tr>
  <tr><td>CS101</td><td>30</td><td>27</td></tr>
  <tr><td>MA102</td><td>28</td><td>20</td></tr>
</table>
"#;

const COURSES: &str = r#"
<table>
  <tr><th>Code</th><th>Course</th></tr>
  <tr><td>CS201</td><td>Data Structures</td></tr>
</table>
"#;

const CAPTCHA_PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake-captcha";

// ── Helpers ─────────────────────────────────────────────────────────────────

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/html")
        .set_body_string(body)
}

fn portal_url(server: &MockServer, page: &str) -> String {
    format!("{}/imsnsit/{page}", server.uri())
}

fn store_in(dir: &TempDir) -> SessionStore {
    SessionStore::new(dir.path().join("session.db"))
}

fn config_for(server: &MockServer) -> PortalConfig {
    PortalConfig::with_base_url(&format!("{}/imsnsit/", server.uri())).unwrap()
}

fn client_for(server: &MockServer, dir: &TempDir, solver: Box<dyn CaptchaSolver>) -> PortalClient {
    PortalClient::open(config_for(server), store_in(dir), solver)
        .unwrap()
        .with_credentials(Credentials::new("2021UCS1234", "s3cret"))
}

fn has_cookie(name_value: &'static str) -> impl Fn(&Request) -> bool + Send + Sync {
    move |req: &Request| {
        req.headers
            .get("cookie")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|c| c.contains(name_value))
    }
}

/// Mount the login sequence: base page, CAPTCHA page and image, credential POST.
async fn mount_login(server: &MockServer, login_body: &str, expected_logins: u64) {
    Mock::given(method("GET"))
        .and(path("/imsnsit/"))
        .respond_with(html("<html>IMS</html>").insert_header("set-cookie", "PHPSESSID=seed; path=/"))
        .expect(expected_logins)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/imsnsit/student_login110.php"))
        .and(has_cookie("PHPSESSID=seed"))
        .respond_with(html(LOGIN_PAGE))
        .expect(expected_logins)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/imsnsit/captcha.php"))
        .and(has_cookie("PHPSESSID=seed"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(CAPTCHA_PNG))
        .expect(expected_logins)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/imsnsit/student_login.php"))
        .and(body_string_contains("uid=2021UCS1234"))
        .and(body_string_contains("pwd=s3cret"))
        .and(body_string_contains("HRAND_NUM=4242"))
        .and(body_string_contains("cap=ab12"))
        .and(body_string_contains("logintype=student"))
        .respond_with(html(login_body).insert_header("set-cookie", "PHPSESSID=live; path=/"))
        .expect(expected_logins)
        .mount(server)
        .await;
}

async fn mount_portal_pages(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/imsnsit/profile.php"))
        .respond_with(html(PROFILE))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/imsnsit/menu.php"))
        .respond_with(html(MENU))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/imsnsit/att.php"))
        .respond_with(html(ATTENDANCE_FORM))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/imsnsit/att.php"))
        .and(body_string_contains("year=2023-24"))
        .and(body_string_contains("enc_year=EY2023"))
        .and(body_string_contains("enc_sem=ES1"))
        .and(body_string_contains("recentitycode=2021UCS1234"))
        .and(body_string_contains("dept=COE"))
        .and(body_string_contains("degree=B.Tech"))
        .respond_with(html(ATTENDANCE_REPORT))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/imsnsit/courses.php"))
        .respond_with(html(COURSES))
        .mount(server)
        .await;
}

/// Persist a session that looks logged in at `profile_page`.
fn seed_session(server: &MockServer, dir: &TempDir, profile_page: &str) {
    let mut links = LinkTable::new();
    links.insert("attendanceReport", portal_url(server, "att.php"));
    links.insert("currentSemesterRegisteredCourses", portal_url(server, "courses.php"));
    store_in(dir)
        .save(&SessionUpdate {
            profile_url: Some(portal_url(server, profile_page)),
            activities_url: Some(portal_url(server, "menu.php")),
            link_table: Some(links),
            ..Default::default()
        })
        .unwrap();
}

// ── Authentication ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_live_session_is_resumed_without_login_requests() {
    let server = MockServer::start().await;
    mount_login(&server, LOGIN_OK, 0).await;
    mount_portal_pages(&server).await;

    let dir = tempfile::tempdir().unwrap();
    seed_session(&server, &dir, "profile.php");

    let mut client = client_for(&server, &dir, Box::new(FixedSolver::new("ab12")));
    let outcome = client.authenticate(false).await.unwrap();

    assert_eq!(outcome, AuthOutcome::Resumed);
    assert!(client.is_authenticated());
}

#[tokio::test]
async fn test_forced_login_runs_full_sequence() {
    let server = MockServer::start().await;
    mount_login(&server, LOGIN_OK, 1).await;
    mount_portal_pages(&server).await;

    let dir = tempfile::tempdir().unwrap();
    seed_session(&server, &dir, "profile.php");

    let mut client = client_for(&server, &dir, Box::new(FixedSolver::new("ab12")));
    let outcome = client.authenticate(true).await.unwrap();

    assert_eq!(outcome, AuthOutcome::LoggedIn);
    assert_eq!(
        client.state().profile_url,
        portal_url(&server, "profile.php?sid=abc")
    );
}

#[tokio::test]
async fn test_expired_session_relogin_persists_for_next_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/imsnsit/dead.php"))
        .respond_with(html(EXPIRED))
        .mount(&server)
        .await;
    mount_login(&server, LOGIN_OK, 1).await;
    mount_portal_pages(&server).await;

    let dir = tempfile::tempdir().unwrap();
    seed_session(&server, &dir, "dead.php");

    let solver = |challenge: &CaptchaChallenge| -> PortalResult<String> {
        assert!(challenge.image_url.ends_with("/imsnsit/captcha.php?r=31337"));
        assert_eq!(challenge.token, "4242");
        assert_eq!(challenge.image, CAPTCHA_PNG);
        Ok(" ab12 ".to_string())
    };
    let mut client = client_for(&server, &dir, Box::new(solver));
    assert_eq!(client.authenticate(false).await.unwrap(), AuthOutcome::LoggedIn);

    let persisted = store_in(&dir).load();
    assert_eq!(persisted.profile_url, portal_url(&server, "profile.php?sid=abc"));
    assert_eq!(persisted.activities_url, portal_url(&server, "menu.php?sid=abc"));
    assert_eq!(persisted.link_table.len(), 3);
    assert_eq!(
        persisted.link_table.get("tudentTranscriptCbcsNsit"),
        Some(portal_url(&server, "transcript.php").as_str())
    );
    assert_eq!(
        persisted.http.cookies.get("PHPSESSID").map(String::as_str),
        Some("live")
    );

    // A new process picks the session up from disk and never logs in again.
    let next = client_for(&server, &dir, Box::new(ims_portal::NoSolver));
    let profile = next.student_profile().await.unwrap();
    assert_eq!(profile.student_id, "2021UCS1234");
    assert_eq!(profile.name, "Asha Verma");
}

#[tokio::test]
async fn test_login_failure_is_terminal() {
    let server = MockServer::start().await;
    mount_login(&server, LOGIN_FAILED, 1).await;
    Mock::given(method("GET"))
        .and(path("/imsnsit/menu.php"))
        .respond_with(html(MENU))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    let config = config_for(&server);
    let credentials = Credentials::new("2021UCS1234", "s3cret");
    let solver = FixedSolver::new("ab12");

    let mut http = PortalHttp::new(config.timeout_ms).unwrap();
    let mut session = SessionState::default();
    let mut flow = AuthenticationFlow::new(&config, &credentials, &solver);
    let err = flow.run(&mut http, &mut session, &store).await.unwrap_err();

    assert!(matches!(err, PortalError::AuthenticationFailed { .. }));
    assert_eq!(flow.state(), AuthState::Failed);
    assert!(session.is_blank());
    assert!(store.load().is_blank());
}

#[tokio::test]
async fn test_login_sends_navigation_headers() {
    let server = MockServer::start().await;
    mount_login(&server, LOGIN_OK, 1).await;
    mount_portal_pages(&server).await;

    let dir = tempfile::tempdir().unwrap();
    let mut client = client_for(&server, &dir, Box::new(FixedSolver::new("ab12")));
    client.authenticate(false).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let login_post = requests
        .iter()
        .find(|r| r.method.as_str() == "POST" && r.url.path() == "/imsnsit/student_login.php")
        .expect("login was posted");
    let header = |name: &str| {
        login_post
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    assert_eq!(header("origin"), server.uri());
    assert_eq!(header("referer"), format!("{}/imsnsit/", server.uri()));
    assert_eq!(header("sec-fetch-dest"), "frame");
    assert_eq!(header("sec-fetch-user"), "?1");
    assert!(header("user-agent").contains("Mozilla/5.0"));
}

#[tokio::test]
async fn test_login_recovers_from_corrupt_store() {
    let server = MockServer::start().await;
    mount_login(&server, LOGIN_OK, 1).await;
    mount_portal_pages(&server).await;

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("session.db"), b"not a database").unwrap();

    let mut client = client_for(&server, &dir, Box::new(FixedSolver::new("ab12")));
    assert_eq!(client.authenticate(false).await.unwrap(), AuthOutcome::LoggedIn);
    assert!(client.is_authenticated());

    let persisted = store_in(&dir).load();
    assert_eq!(persisted.profile_url, portal_url(&server, "profile.php?sid=abc"));
    assert_eq!(persisted.activities_url, portal_url(&server, "menu.php?sid=abc"));
    assert_eq!(persisted.link_table.len(), 3);

    std::fs::write(dir.path().join("session.db"), b"not a database").unwrap();
    client.logout().unwrap();
    assert!(store_in(&dir).load().is_blank());
}

#[tokio::test]
async fn test_failed_discovery_drops_previous_links() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/imsnsit/dead.php"))
        .respond_with(html(EXPIRED))
        .mount(&server)
        .await;
    let unreachable_menu = r#"
        <a href="profile.php?sid=new">Profile</a>
        <a href="http://127.0.0.1:9/menu.php?sid=new">My Activities</a>
    "#;
    mount_login(&server, unreachable_menu, 1).await;

    let dir = tempfile::tempdir().unwrap();
    seed_session(&server, &dir, "dead.php");
    assert_eq!(store_in(&dir).load().link_table.len(), 2);

    let mut client = client_for(&server, &dir, Box::new(FixedSolver::new("ab12")));
    let err = client.authenticate(false).await.unwrap_err();
    assert!(matches!(err, PortalError::Transport(_)));

    let persisted = store_in(&dir).load();
    assert_eq!(persisted.profile_url, portal_url(&server, "profile.php?sid=new"));
    assert!(persisted.link_table.is_empty());
    assert!(client.links().is_empty());
}

// ── Data operations ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_attendance_defaults_match_explicit_identity() {
    let server = MockServer::start().await;
    mount_portal_pages(&server).await;

    let dir = tempfile::tempdir().unwrap();
    seed_session(&server, &dir, "profile.php");
    let client = client_for(&server, &dir, Box::new(ims_portal::NoSolver));

    let defaulted = client.attendance(&AttendanceQuery::default()).await.unwrap();
    let explicit = client
        .attendance(&AttendanceQuery::new("2021UCS1234", "COE", "B.Tech"))
        .await
        .unwrap();

    assert_eq!(defaulted.len(), 2);
    assert_eq!(defaulted, explicit);
    assert_eq!(defaulted[0]["Subject"], "CS101");
}

#[tokio::test]
async fn test_enrolled_courses() {
    let server = MockServer::start().await;
    mount_portal_pages(&server).await;

    let dir = tempfile::tempdir().unwrap();
    seed_session(&server, &dir, "profile.php");
    let client = client_for(&server, &dir, Box::new(ims_portal::NoSolver));

    let courses = client.enrolled_courses().await.unwrap();
    assert_eq!(courses.len(), 1);
    assert_eq!(courses[0]["Course"], "Data Structures");
}

#[tokio::test]
async fn test_expired_data_page_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/imsnsit/courses.php"))
        .respond_with(html(EXPIRED))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    seed_session(&server, &dir, "profile.php");
    let client = client_for(&server, &dir, Box::new(ims_portal::NoSolver));

    let err = client.enrolled_courses().await.unwrap_err();
    assert!(matches!(err, PortalError::SessionExpired));
    assert!(err.needs_login());
}

#[tokio::test]
async fn test_snapshot_collects_everything() {
    let server = MockServer::start().await;
    mount_login(&server, LOGIN_OK, 0).await;
    mount_portal_pages(&server).await;

    let dir = tempfile::tempdir().unwrap();
    seed_session(&server, &dir, "profile.php");
    let mut client = client_for(&server, &dir, Box::new(ims_portal::NoSolver));

    let snapshot = client.snapshot().await.unwrap();
    assert_eq!(snapshot.profile.branch, "COE");
    assert_eq!(snapshot.attendance.len(), 2);
    assert_eq!(snapshot.courses.len(), 1);
}

#[tokio::test]
async fn test_transport_failure_is_surfaced() {
    let dir = tempfile::tempdir().unwrap();
    let config = PortalConfig::with_base_url("http://127.0.0.1:9/imsnsit/").unwrap();
    let mut links = LinkTable::new();
    links.insert("currentSemesterRegisteredCourses", "http://127.0.0.1:9/imsnsit/courses.php");
    store_in(&dir)
        .save(&SessionUpdate {
            link_table: Some(links),
            ..Default::default()
        })
        .unwrap();

    let client = PortalClient::open(config, store_in(&dir), Box::new(ims_portal::NoSolver)).unwrap();
    let err = client.enrolled_courses().await.unwrap_err();
    assert!(matches!(err, PortalError::Transport(_)));
}

#[tokio::test]
async fn test_rotated_cookie_is_saved_after_data_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/imsnsit/courses.php"))
        .respond_with(html(COURSES).insert_header("set-cookie", "PHPSESSID=rotated; path=/"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    seed_session(&server, &dir, "profile.php");
    let client = client_for(&server, &dir, Box::new(ims_portal::NoSolver));

    client.enrolled_courses().await.unwrap();
    client.save_session().unwrap();

    let persisted = store_in(&dir).load();
    assert_eq!(
        persisted.http.cookies.get("PHPSESSID").map(String::as_str),
        Some("rotated")
    );
    assert_eq!(persisted.link_table.len(), 2);
}
