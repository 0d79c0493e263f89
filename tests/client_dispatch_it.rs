#![cfg(feature = "reqwest")]

// crates.io
use httpmock::prelude::*;
// self
use bearer_relay::{_preludet::*, client::RequestOptions};

#[tokio::test]
async fn get_attaches_bearer_header_and_returns_payload() {
	let server = MockServer::start_async().await;
	let (client, store, _) = build_test_client(&server.base_url(), "/session/refresh");

	seed_token(&store, "t-1");

	let mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/employees").header("authorization", "Bearer t-1");
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"data\":{\"id\":7}}");
		})
		.await;
	let payload = client
		.get("/employees", RequestOptions::new())
		.await
		.expect("GET with a valid token should succeed.");

	mock.assert_async().await;

	assert_eq!(payload.pointer("/data/id"), Some(&json!(7)));
}

#[tokio::test]
async fn forbidden_is_terminal_and_never_triggers_refresh() {
	let server = MockServer::start_async().await;
	let (client, store, navigator) = build_test_client(&server.base_url(), "/session/refresh");

	seed_token(&store, "t-1");

	let refresh_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/session/refresh");
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"success\":true,\"data\":{\"accessToken\":\"t-2\"}}");
		})
		.await;
	let resource_mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/payroll");
			then.status(403)
				.header("content-type", "application/json")
				.body("{\"message\":\"not allowed\"}");
		})
		.await;
	let err = client
		.get("/payroll", RequestOptions::new())
		.await
		.expect_err("403 should surface as a terminal error.");

	resource_mock.assert_async().await;
	refresh_mock.assert_calls_async(0).await;

	assert_eq!(err.status(), 403);
	assert!(matches!(err, Error::Api(ref api) if api.message == "not allowed"));
	assert_eq!(navigator.redirects(), 0);
}

#[tokio::test]
async fn success_flagged_error_status_is_delivered_as_success() {
	let server = MockServer::start_async().await;
	let (client, store, _) = build_test_client(&server.base_url(), "/session/refresh");

	seed_token(&store, "t-1");

	let mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/shifts");
			then.status(404)
				.header("content-type", "application/json")
				.body("{\"success\":true,\"data\":[]}");
		})
		.await;
	let payload = client
		.get("/shifts", RequestOptions::new())
		.await
		.expect("Success-flagged 404 should be delivered as a success.");

	mock.assert_async().await;

	assert_eq!(payload.get("data"), Some(&json!([])));
}

#[tokio::test]
async fn unreachable_server_surfaces_status_zero() {
	// Port 9 (discard) is reserved and should refuse connections locally.
	let (client, store, _) = build_test_client("http://127.0.0.1:9", "/session/refresh");

	seed_token(&store, "t-1");

	let err = client
		.get("/employees", RequestOptions::new())
		.await
		.expect_err("Unreachable server should fail the call.");

	assert!(matches!(err, Error::Unreachable { .. }));
	assert_eq!(err.status(), 0);
}

#[tokio::test]
async fn unauthenticated_option_suppresses_bearer_header() {
	let server = MockServer::start_async().await;
	let (client, store, _) = build_test_client(&server.base_url(), "/session/refresh");

	seed_token(&store, "t-1");

	// Created first so a leaked Authorization header is caught by the assert below.
	let with_auth_mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/public/holidays").header_exists("authorization");
			then.status(500);
		})
		.await;
	let plain_mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/public/holidays");
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"data\":[\"2026-12-25\"]}");
		})
		.await;
	let payload = client
		.get("/public/holidays", RequestOptions::new().unauthenticated())
		.await
		.expect("Unauthenticated call should succeed without a bearer header.");

	with_auth_mock.assert_calls_async(0).await;
	plain_mock.assert_async().await;

	assert_eq!(payload.pointer("/data/0"), Some(&json!("2026-12-25")));
}

#[tokio::test]
async fn caller_content_type_replaces_the_default() {
	let server = MockServer::start_async().await;
	let (client, store, _) = build_test_client(&server.base_url(), "/session/refresh");

	seed_token(&store, "t-1");

	// Created first so a lingering default value is caught by the assert below.
	let default_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/notes").header("content-type", "application/json");
			then.status(500);
		})
		.await;
	let override_mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/notes")
				.header("content-type", "application/json; charset=utf-8");
			then.status(200).header("content-type", "application/json").body("{\"data\":{}}");
		})
		.await;

	client
		.post(
			"/notes",
			json!({"note": "handover"}),
			RequestOptions::new().header("Content-Type", "application/json; charset=utf-8"),
		)
		.await
		.expect("Overridden content type should reach the server.");

	default_mock.assert_calls_async(0).await;
	override_mock.assert_calls_async(1).await;
}

#[tokio::test]
async fn terminal_error_extracts_nested_message_and_code() {
	let server = MockServer::start_async().await;
	let (client, store, _) = build_test_client(&server.base_url(), "/session/refresh");

	seed_token(&store, "t-1");

	let mock = server
		.mock_async(|when, then| {
			when.method(PUT).path("/employees/7");
			then.status(409).header("content-type", "application/json").body(
				"{\"error\":{\"code\":\"E_DUP\",\"message\":\"duplicate entry\"},\"message\":\"outer\"}",
			);
		})
		.await;
	let err = client
		.put("/employees/7", json!({"name": "A."}), RequestOptions::new())
		.await
		.expect_err("409 should surface as a terminal error.");

	mock.assert_async().await;

	match err {
		Error::Api(api) => {
			assert_eq!(api.status, 409);
			assert_eq!(api.message, "duplicate entry");
			assert_eq!(api.error_code.as_deref(), Some("E_DUP"));
			assert_eq!(api.response.status, 409);
			assert_eq!(api.response.data.get("message"), Some(&json!("outer")));
		},
		other => panic!("Expected an API error, got {other:?}."),
	}
}
