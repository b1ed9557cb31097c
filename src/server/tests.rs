use super::*;
use crate::data::configuration::{AuthConfig, Configuration};
use crate::entity::helpers::sessions;
use axum::body::Body;
use axum::http::{Method, StatusCode, header};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

const PASSWORD: &str = "open sesame";

struct Harness {
    app: Router,
    state: ServerState,
    _dir: TempDir,
}

struct Reply {
    status: StatusCode,
    set_cookie: Vec<String>,
    body: Value,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Configuration::default();
    config.database.path = dir.path().display().to_string();
    config.auth = AuthConfig {
        jwt_secret: Some("test-secret".into()),
        shared_password: Some(PASSWORD.into()),
        admin_secret: Some("admin".into()),
        session_cleanup_key: Some("sweep".into()),
        bcrypt_cost: 4,
        ..AuthConfig::default()
    };

    let mut connector = SQLConnector::new(&config.database.connection_url());
    connector.connect().await.unwrap();
    connector.initialize(&config).await.unwrap();
    let state = ServerState::new(&config, connector);
    Harness {
        app: build_router(state.clone()),
        state,
        _dir: dir,
    }
}

impl Harness {
    async fn send(
        &self,
        method: Method,
        uri: &str,
        cookie: Option<&str>,
        body: Option<Value>,
    ) -> Reply {
        let mut request = axum::http::Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            request = request.header(header::COOKIE, cookie);
        }
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let set_cookie = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        Reply {
            status,
            set_cookie,
            body,
        }
    }

    async fn login_with(&self, password: &str) -> Reply {
        self.send(
            Method::POST,
            "/api/login",
            None,
            Some(json!({ "password": password, "name": "Asha" })),
        )
        .await
    }

    async fn login(&self) -> String {
        let reply = self.login_with(PASSWORD).await;
        assert_eq!(reply.status, StatusCode::OK);
        session_of(&reply)
    }

    async fn add_named(&self, cookie: &str, name: &str) -> String {
        let body = json!({ "person": { "name": name } });
        id_of(&self.add_person(cookie, body).await)
    }

    async fn add_related(&self, cookie: &str, name: &str, kind: &str, to: &str) -> String {
        id_of(&self.add_person(cookie, related(name, kind, to)).await)
    }

    async fn add_person(&self, cookie: &str, body: Value) -> Value {
        let reply = self
            .send(Method::POST, "/api/persons", Some(cookie), Some(body))
            .await;
        assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);
        reply.body["person"].clone()
    }
}

/// `auth_token=...` from a login reply.
fn session_of(reply: &Reply) -> String {
    reply.set_cookie[0]
        .split(';')
        .next()
        .unwrap()
        .to_string()
}

fn link_body(p1: &str, p2: &str, kind: &str) -> Value {
    json!({ "person1_id": p1, "person2_id": p2, "relationship_type": kind })
}

fn related(name: &str, kind: &str, to: &str) -> Value {
    json!({ "person": { "name": name }, "relationshipType": kind, "relatedPersonId": to })
}

fn id_of(person: &Value) -> String {
    person["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn login_rejects_wrong_and_missing_passwords() {
    let h = harness().await;
    let wrong = h.login_with("nope").await;
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong.body["error"], "Invalid password");

    let missing = h
        .send(Method::POST, "/api/login", None, Some(json!({ "name": "Asha" })))
        .await;
    assert_eq!(missing.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn login_sets_a_strict_http_only_cookie() {
    let h = harness().await;
    let reply = h.login_with(PASSWORD).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["user"], "Asha");
    assert_eq!(reply.body["message"], "Login successful");

    let cookie = &reply.set_cookie[0];
    assert!(cookie.starts_with("auth_token="));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Strict"));
    assert!(cookie.contains("Path=/"));
    assert!(!cookie.contains("Secure"));
}

#[tokio::test]
async fn anonymous_logins_are_named_anonymous() {
    let h = harness().await;
    let reply = h
        .send(Method::POST, "/api/login", None, Some(json!({ "password": PASSWORD })))
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["user"], "Anonymous");
}

#[tokio::test]
async fn data_routes_need_a_session() {
    let h = harness().await;
    for uri in ["/api/persons", "/api/relationships/all", "/api/tree"] {
        let reply = h.send(Method::GET, uri, None, None).await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED, "{uri}");
        assert!(reply.body["error"].is_string());
    }
    let forged = h
        .send(Method::GET, "/api/persons", Some("auth_token=not.a.jwt"), None)
        .await;
    assert_eq!(forged.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn person_lifecycle() {
    let h = harness().await;
    let cookie = h.login().await;
    let person = h
        .add_person(&cookie, json!({ "person": { "name": "Asha", "birthday": "1961-04-12" } }))
        .await;
    let id = id_of(&person);
    assert_eq!(person["birthday"], "1961-04-12");
    assert_eq!(person["flagged_for_deletion"], false);

    let listed = h
        .send(Method::GET, "/api/persons", Some(&cookie), None)
        .await;
    assert_eq!(listed.body.as_array().unwrap().len(), 1);

    let uri = format!("/api/persons/{id}");
    let updated = h
        .send(
            Method::PUT,
            &uri,
            Some(&cookie),
            Some(json!({ "name": "Asha Rao", "location": "Mysuru" })),
        )
        .await;
    assert_eq!(updated.status, StatusCode::OK);
    assert_eq!(updated.body["person"]["name"], "Asha Rao");

    let blank = h
        .send(Method::PUT, &uri, Some(&cookie), Some(json!({ "name": " " })))
        .await;
    assert_eq!(blank.status, StatusCode::BAD_REQUEST);

    let fetched = h.send(Method::GET, &uri, Some(&cookie), None).await;
    assert_eq!(fetched.body["location"], "Mysuru");

    let deleted = h.send(Method::DELETE, &uri, Some(&cookie), None).await;
    assert_eq!(deleted.status, StatusCode::OK);
    let gone = h.send(Method::GET, &uri, Some(&cookie), None).await;
    assert_eq!(gone.status, StatusCode::NOT_FOUND);

    let bad_id = h
        .send(Method::GET, "/api/persons/not-a-uuid", Some(&cookie), None)
        .await;
    assert_eq!(bad_id.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_bodies_are_bad_requests() {
    let h = harness().await;
    let cookie = h.login().await;
    let request = axum::http::Request::builder()
        .method(Method::POST)
        .uri("/api/persons")
        .header(header::COOKIE, &cookie)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"person\": "))
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let no_name = h
        .send(Method::POST, "/api/persons", Some(&cookie), Some(json!({ "person": {} })))
        .await;
    assert_eq!(no_name.status, StatusCode::BAD_REQUEST);

    let no_related = h
        .send(
            Method::POST,
            "/api/persons",
            Some(&cookie),
            Some(json!({ "person": { "name": "Bala" }, "relationshipType": "spouse" })),
        )
        .await;
    assert_eq!(no_related.status, StatusCode::BAD_REQUEST);

    let unknown_related = h
        .send(
            Method::POST,
            "/api/persons",
            Some(&cookie),
            Some(json!({
                "person": { "name": "Bala" },
                "relationshipType": "spouse",
                "relatedPersonId": Uuid::new_v4(),
            })),
        )
        .await;
    assert_eq!(unknown_related.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn child_of_a_married_person_is_linked_to_both_spouses() {
    let h = harness().await;
    let cookie = h.login().await;
    let mum = h.add_named(&cookie, "Meera").await;
    let dad = h.add_related(&cookie, "Dev", "spouse", &mum).await;
    let kid = h.add_related(&cookie, "Kavi", "child", &mum).await;

    let rows = h
        .send(Method::GET, &format!("/api/relationships/{kid}"), Some(&cookie), None)
        .await;
    let parents: Vec<&str> = rows
        .body
        .as_array()
        .unwrap()
        .iter()
        .filter(|r| r["relationship_type"] == "parent")
        .map(|r| r["person1_id"].as_str().unwrap())
        .collect();
    assert_eq!(parents.len(), 2);
    assert!(parents.contains(&mum.as_str()) && parents.contains(&dad.as_str()));
}

#[tokio::test]
async fn relationship_posts_are_validated_and_idempotent() {
    let h = harness().await;
    let cookie = h.login().await;
    let [a, b, c, d] = [
        h.add_named(&cookie, "Asha").await,
        h.add_named(&cookie, "Bala").await,
        h.add_named(&cookie, "Chitra").await,
        h.add_named(&cookie, "Dev").await,
    ];
    let uri = "/api/relationships/all";

    let first = h
        .send(Method::POST, uri, Some(&cookie), Some(link_body(&a, &b, "spouse")))
        .await;
    assert_eq!(first.status, StatusCode::CREATED);
    let again = h
        .send(Method::POST, uri, Some(&cookie), Some(link_body(&b, &a, "spouse")))
        .await;
    assert_eq!(again.status, StatusCode::OK);
    assert_eq!(again.body["created"], false);

    let tree = h.send(Method::GET, "/api/tree", Some(&cookie), None).await;
    let marriages = tree.body["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|n| n["data"]["kind"] == "marriage")
        .count();
    assert_eq!(marriages, 1);

    let own = h
        .send(Method::POST, uri, Some(&cookie), Some(link_body(&a, &a, "spouse")))
        .await;
    assert_eq!(own.status, StatusCode::BAD_REQUEST);

    // mirrored onto Bala, so Chitra has two parents after one post
    let parent = h
        .send(Method::POST, uri, Some(&cookie), Some(link_body(&a, &c, "parent")))
        .await;
    assert_eq!(parent.status, StatusCode::CREATED);
    assert_eq!(parent.body["mirrored"].as_array().unwrap().len(), 1);
    let third = h
        .send(Method::POST, uri, Some(&cookie), Some(link_body(&d, &c, "parent")))
        .await;
    assert_eq!(third.status, StatusCode::BAD_REQUEST);

    let ghost = Uuid::new_v4().to_string();
    let unknown = h
        .send(Method::POST, uri, Some(&cookie), Some(link_body(&a, &ghost, "spouse")))
        .await;
    assert_eq!(unknown.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn relationships_are_edited_by_query_id() {
    let h = harness().await;
    let cookie = h.login().await;
    let a = h.add_named(&cookie, "Asha").await;
    let b = h.add_named(&cookie, "Bala").await;
    let created = h
        .send(
            Method::POST,
            "/api/relationships/all",
            Some(&cookie),
            Some(json!({ "person1_id": a, "person2_id": b, "relationship_type": "parent" })),
        )
        .await;
    let rel = id_of(&created.body["relationship"]);
    let uri = format!("/api/relationships/all?id={rel}");

    let flipped = h
        .send(Method::PUT, &uri, Some(&cookie), Some(json!({ "relationship_type": "child" })))
        .await;
    assert_eq!(flipped.status, StatusCode::OK);
    assert_eq!(flipped.body["relationship_type"], "child");
    assert_eq!(flipped.body["person1_id"], a);

    let deleted = h.send(Method::DELETE, &uri, Some(&cookie), None).await;
    assert_eq!(deleted.status, StatusCode::OK);
    let again = h.send(Method::DELETE, &uri, Some(&cookie), None).await;
    assert_eq!(again.status, StatusCode::NOT_FOUND);

    let no_id = h
        .send(Method::DELETE, "/api/relationships/all", Some(&cookie), None)
        .await;
    assert_eq!(no_id.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn deleting_a_person_removes_their_relationships() {
    let h = harness().await;
    let cookie = h.login().await;
    let a = h.add_named(&cookie, "Asha").await;
    h.add_related(&cookie, "Bala", "spouse", &a).await;
    h.add_related(&cookie, "Chitra", "parent", &a).await;

    let deleted = h
        .send(Method::DELETE, &format!("/api/persons/{a}"), Some(&cookie), None)
        .await;
    assert_eq!(deleted.status, StatusCode::OK);
    let rows = h
        .send(Method::GET, "/api/relationships/all", Some(&cookie), None)
        .await;
    assert!(rows.body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn tree_follows_the_requested_direction() {
    let h = harness().await;
    let cookie = h.login().await;
    let a = h.add_named(&cookie, "Asha").await;
    h.add_related(&cookie, "Chitra", "child", &a).await;

    let lr = h
        .send(Method::GET, "/api/tree?direction=LR", Some(&cookie), None)
        .await;
    assert_eq!(lr.status, StatusCode::OK);
    assert_eq!(lr.body["direction"], "LR");
    let node = &lr.body["nodes"][0];
    assert_eq!(node["source_position"], "right");
    assert_eq!(lr.body["edges"].as_array().unwrap().len(), 1);

    let bad = h
        .send(Method::GET, "/api/tree?direction=diagonal", Some(&cookie), None)
        .await;
    assert_eq!(bad.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn password_rotation_needs_the_admin_secret_and_revokes_tokens() {
    let h = harness().await;
    let cookie = h.login().await;
    let uri = "/api/update-password";

    let no_secret = h
        .send(Method::POST, uri, None, Some(json!({ "newPassword": "new one" })))
        .await;
    assert_eq!(no_secret.status, StatusCode::FORBIDDEN);
    let wrong = h
        .send(
            Method::POST,
            uri,
            None,
            Some(json!({ "newPassword": "new one", "adminSecret": "guess" })),
        )
        .await;
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);
    let empty = h
        .send(Method::POST, uri, None, Some(json!({ "adminSecret": "admin" })))
        .await;
    assert_eq!(empty.status, StatusCode::BAD_REQUEST);

    let rotated = h
        .send(
            Method::POST,
            uri,
            None,
            Some(json!({ "newPassword": "new one", "adminSecret": "admin" })),
        )
        .await;
    assert_eq!(rotated.status, StatusCode::OK);

    let stale = h
        .send(Method::GET, "/api/persons", Some(&cookie), None)
        .await;
    assert_eq!(stale.status, StatusCode::UNAUTHORIZED);
    assert_eq!(h.login_with(PASSWORD).await.status, StatusCode::UNAUTHORIZED);
    let fresh = h.login_with("new one").await;
    assert_eq!(fresh.status, StatusCode::OK);
}

#[tokio::test]
async fn logout_clears_the_cookie_and_the_audit_row() {
    let h = harness().await;
    let cookie = h.login().await;
    let reply = h
        .send(Method::POST, "/api/logout", Some(&cookie), None)
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.set_cookie[0].starts_with("auth_token="));
    assert!(reply.set_cookie[0].contains("Max-Age=0"));

    let db = h.state.db().unwrap();
    assert_eq!(sessions::forget_all_logins(db).await.unwrap(), 0);

    let anonymous = h.send(Method::POST, "/api/logout", None, None).await;
    assert_eq!(anonymous.status, StatusCode::OK);
}

#[tokio::test]
async fn cleanup_respects_the_key_and_keeps_live_sessions() {
    let h = harness().await;
    h.login().await;
    let db = h.state.db().unwrap();
    let now = Utc::now();
    let (created, expired) = (now - Duration::days(9), now - Duration::days(2));
    sessions::record_login(db, Uuid::new_v4(), "old", created, expired)
        .await
        .unwrap();

    let denied = h
        .send(Method::GET, "/api/cleanup-sessions?key=wrong", None, None)
        .await;
    assert_eq!(denied.status, StatusCode::UNAUTHORIZED);
    let missing = h
        .send(Method::POST, "/api/cleanup-sessions", None, None)
        .await;
    assert_eq!(missing.status, StatusCode::UNAUTHORIZED);

    let swept = h
        .send(Method::POST, "/api/cleanup-sessions?key=sweep", None, None)
        .await;
    assert_eq!(swept.status, StatusCode::OK);
    assert_eq!(swept.body["success"], true);
    assert_eq!(swept.body["deletedCount"], 1);
    // the live login from above survives
    assert_eq!(sessions::forget_all_logins(db).await.unwrap(), 1);
}

#[tokio::test]
async fn simultaneous_first_logins_share_one_password_row() {
    let h = harness().await;
    let (first, second) = tokio::join!(h.login_with(PASSWORD), h.login_with(PASSWORD));
    assert_eq!(first.status, StatusCode::OK, "{}", first.body);
    assert_eq!(second.status, StatusCode::OK, "{}", second.body);

    // neither login rotated the password out from under the other
    for reply in [first, second] {
        let cookie = session_of(&reply);
        let listed = h
            .send(Method::GET, "/api/persons", Some(&cookie), None)
            .await;
        assert_eq!(listed.status, StatusCode::OK);
    }
}

#[tokio::test]
async fn editing_a_relationship_into_a_duplicate_is_a_bad_request() {
    let h = harness().await;
    let cookie = h.login().await;
    let a = h.add_named(&cookie, "Asha").await;
    let b = h.add_named(&cookie, "Bala").await;
    let c = h.add_named(&cookie, "Chitra").await;
    let uri = "/api/relationships/all";
    h.send(Method::POST, uri, Some(&cookie), Some(link_body(&a, &b, "spouse")))
        .await;
    let ac = h
        .send(Method::POST, uri, Some(&cookie), Some(link_body(&a, &c, "spouse")))
        .await;
    let ac = id_of(&ac.body["relationship"]);

    let duplicate = h
        .send(
            Method::PUT,
            &format!("{uri}?id={ac}"),
            Some(&cookie),
            Some(json!({ "person1_id": b, "person2_id": a })),
        )
        .await;
    assert_eq!(duplicate.status, StatusCode::BAD_REQUEST);
    let rows = h.send(Method::GET, uri, Some(&cookie), None).await;
    assert_eq!(rows.body.as_array().unwrap().len(), 2);
}
