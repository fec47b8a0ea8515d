use std::sync::Arc;

use feed_api::{
    AppState, app,
    config::Config,
    db,
    entities::{comment, follow, post, user},
    forms::{GroupForm, PostForm},
    store,
};
use poem::{
    Endpoint,
    http::{StatusCode, header},
    test::{TestClient, TestResponse},
};
use sea_orm::{EntityTrait, PaginatorTrait};
use serde_json::{Value, json};

fn config() -> Config {
    Config {
        database_url: "sqlite::memory:".to_owned(),
        bind_addr: "127.0.0.1:0".to_owned(),
        jwt_secret: "test-secret".to_owned(),
        token_ttl_secs: 3600,
        page_cache_ttl_secs: 60,
        page_cache_capacity: 64,
        fallback_author_id: 1,
    }
}

async fn setup() -> (TestClient<impl Endpoint>, Arc<AppState>) {
    let config = config();
    let db = db::connect(&config.database_url).await.unwrap();
    let state = Arc::new(AppState::new(db, &config));
    (TestClient::new(app(state.clone())), state)
}

/// Creates a user and returns it with an `Authorization` header value.
async fn login_as(state: &AppState, username: &str) -> (user::Model, String) {
    let user = store::create_user(&state.db, username, "unused".to_owned())
        .await
        .unwrap();
    let token = state.tokens.issue(&user).unwrap();
    (user, format!("Bearer {token}"))
}

async fn seed_group(state: &AppState) -> i32 {
    let form = GroupForm {
        title: "Test group".to_owned(),
        slug: "test-slug".to_owned(),
        description: "Test description".to_owned(),
    };
    store::create_group(&state.db, &form).await.unwrap().id
}

async fn seed_post(state: &AppState, author: &user::Model, text: &str, group: Option<i32>) -> post::Model {
    let form = PostForm {
        text: text.to_owned(),
        group,
        image: None,
        clear_image: false,
    };
    store::create_post(&state.db, author.id, &form).await.unwrap()
}

async fn body(resp: TestResponse) -> Value {
    resp.0.into_body().into_json().await.unwrap()
}

fn texts(page: &Value) -> Vec<String> {
    page["posts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["text"].as_str().unwrap().to_owned())
        .collect()
}

async fn post_count(state: &AppState) -> u64 {
    post::Entity::find().count(&state.db).await.unwrap()
}

#[tokio::test]
async fn new_post_shows_up_on_index_group_and_profile() {
    let (cli, state) = setup().await;
    let (_, auth) = login_as(&state, "test_user").await;
    let group_id = seed_group(&state).await;

    let resp = cli
        .post("/create/")
        .header(header::AUTHORIZATION, auth.as_str())
        .body_json(&json!({ "text": "Brand new post", "group": group_id }))
        .send()
        .await;
    resp.assert_status(StatusCode::FOUND);
    resp.assert_header(header::LOCATION, "/profile/test_user/");
    assert_eq!(post_count(&state).await, 1);

    let index = body(cli.get("/").send().await).await;
    assert_eq!(texts(&index), ["Brand new post"]);
    assert_eq!(index["posts"][0]["group"]["slug"], "test-slug");
    assert_eq!(index["posts"][0]["author"]["username"], "test_user");

    let group = body(cli.get("/group/test-slug/").send().await).await;
    assert_eq!(texts(&group["page"]), ["Brand new post"]);

    let profile = body(cli.get("/profile/test_user/").send().await).await;
    assert_eq!(texts(&profile["page"]), ["Brand new post"]);
    assert_eq!(profile["post_count"], 1);
}

#[tokio::test]
async fn anonymous_create_redirects_to_login() {
    let (cli, state) = setup().await;

    let resp = cli
        .post("/create/")
        .body_json(&json!({ "text": "sneaky" }))
        .send()
        .await;
    resp.assert_status(StatusCode::FOUND);
    resp.assert_header(header::LOCATION, "/auth/login/?next=/create/");
    assert_eq!(post_count(&state).await, 0);

    let resp = cli.get("/create/").send().await;
    resp.assert_status(StatusCode::FOUND);
    resp.assert_header(header::LOCATION, "/auth/login/?next=/create/");
}

#[tokio::test]
async fn create_form_lists_groups() {
    let (cli, state) = setup().await;
    let (_, auth) = login_as(&state, "test_user").await;
    seed_group(&state).await;

    let resp = cli
        .get("/create/")
        .header(header::AUTHORIZATION, auth.as_str())
        .send()
        .await;
    resp.assert_status_is_ok();
    let form = body(resp).await;
    assert_eq!(form["is_edit"], false);
    assert_eq!(form["groups"][0]["slug"], "test-slug");
}

#[tokio::test]
async fn invalid_post_is_reported_on_the_form() {
    let (cli, state) = setup().await;
    let (_, auth) = login_as(&state, "test_user").await;

    let resp = cli
        .post("/create/")
        .header(header::AUTHORIZATION, auth.as_str())
        .body_json(&json!({ "text": "   " }))
        .send()
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    let page = body(resp).await;
    assert!(page["errors"]["text"].is_array());
    assert_eq!(post_count(&state).await, 0);
}

#[tokio::test]
async fn only_the_author_can_edit() {
    let (cli, state) = setup().await;
    let (author, author_auth) = login_as(&state, "test_user").await;
    let (_, other_auth) = login_as(&state, "no_author").await;
    let post = seed_post(&state, &author, "original", None).await;
    let detail = format!("/posts/{}/", post.id);
    let edit = format!("/posts/{}/edit/", post.id);

    let resp = cli
        .get(&edit)
        .header(header::AUTHORIZATION, other_auth.as_str())
        .send()
        .await;
    resp.assert_status(StatusCode::FOUND);
    resp.assert_header(header::LOCATION, detail.as_str());

    let resp = cli
        .post(&edit)
        .header(header::AUTHORIZATION, other_auth.as_str())
        .body_json(&json!({ "text": "hijacked" }))
        .send()
        .await;
    resp.assert_status(StatusCode::FOUND);
    resp.assert_header(header::LOCATION, detail.as_str());
    assert_eq!(store::find_post(&state.db, post.id).await.unwrap().text, "original");

    let resp = cli
        .get(&edit)
        .header(header::AUTHORIZATION, author_auth.as_str())
        .send()
        .await;
    resp.assert_status_is_ok();
    let form = body(resp).await;
    assert_eq!(form["is_edit"], true);
    assert_eq!(form["post"]["text"], "original");

    let resp = cli
        .post(&edit)
        .header(header::AUTHORIZATION, author_auth.as_str())
        .body_json(&json!({ "text": "edited" }))
        .send()
        .await;
    resp.assert_status(StatusCode::FOUND);
    resp.assert_header(header::LOCATION, detail.as_str());
    assert_eq!(store::find_post(&state.db, post.id).await.unwrap().text, "edited");
}

#[tokio::test]
async fn anonymous_edit_redirects_to_login_with_next() {
    let (cli, state) = setup().await;
    let (author, _) = login_as(&state, "test_user").await;
    let post = seed_post(&state, &author, "original", None).await;

    let resp = cli
        .post(format!("/posts/{}/edit/", post.id))
        .body_json(&json!({ "text": "edited" }))
        .send()
        .await;
    resp.assert_status(StatusCode::FOUND);
    resp.assert_header(
        header::LOCATION,
        format!("/auth/login/?next=/posts/{}/edit/", post.id),
    );
}

#[tokio::test]
async fn second_page_holds_the_remainder() {
    let (cli, state) = setup().await;
    let (author, _) = login_as(&state, "test_user").await;
    let group_id = seed_group(&state).await;
    for i in 0..13 {
        seed_post(&state, &author, &format!("post {i}"), Some(group_id)).await;
    }

    let first = body(cli.get("/").send().await).await;
    assert_eq!(texts(&first).len(), 10);
    let second = body(cli.get("/").query("page", &2).send().await).await;
    assert_eq!(texts(&second).len(), 3);
    assert_eq!(second["has_next"], false);

    let group = body(cli.get("/group/test-slug/").query("page", &2).send().await).await;
    assert_eq!(texts(&group["page"]).len(), 3);
    let profile = body(cli.get("/profile/test_user/").send().await).await;
    assert_eq!(texts(&profile["page"]).len(), 10);
    assert_eq!(profile["post_count"], 13);
}

#[tokio::test]
async fn unknown_pages_are_not_found() {
    let (cli, state) = setup().await;
    login_as(&state, "test_user").await;

    for path in ["/postss/", "/group/missing/", "/profile/nobody/", "/posts/42/"] {
        let resp = cli.get(path).send().await;
        resp.assert_status(StatusCode::NOT_FOUND);
        assert_eq!(body(resp).await["page"], "not_found", "{path}");
    }
}

#[tokio::test]
async fn follow_is_idempotent_and_self_follow_is_ignored() {
    let (cli, state) = setup().await;
    let (author, _) = login_as(&state, "TestAuthor").await;
    let (reader, auth) = login_as(&state, "TestUser").await;
    let follows = || follow::Entity::find().count(&state.db);

    for _ in 0..2 {
        let resp = cli
            .get("/profile/TestAuthor/follow/")
            .header(header::AUTHORIZATION, auth.as_str())
            .send()
            .await;
        resp.assert_status(StatusCode::FOUND);
        resp.assert_header(header::LOCATION, "/profile/TestAuthor/");
    }
    assert_eq!(follows().await.unwrap(), 1);

    let profile = body(
        cli.get("/profile/TestAuthor/")
            .header(header::AUTHORIZATION, auth.as_str())
            .send()
            .await,
    )
    .await;
    assert_eq!(profile["following"], true);

    cli.post("/profile/TestUser/follow/")
        .header(header::AUTHORIZATION, auth.as_str())
        .send()
        .await
        .assert_status(StatusCode::FOUND);
    assert_eq!(follows().await.unwrap(), 1);

    cli.post("/profile/TestAuthor/unfollow/")
        .header(header::AUTHORIZATION, auth.as_str())
        .send()
        .await
        .assert_status(StatusCode::FOUND);
    assert_eq!(follows().await.unwrap(), 0);

    // unfollowing again changes nothing
    cli.get("/profile/TestAuthor/unfollow/")
        .header(header::AUTHORIZATION, auth.as_str())
        .send()
        .await
        .assert_status(StatusCode::FOUND);
    assert_eq!(follows().await.unwrap(), 0);
    assert_ne!(reader.id, author.id);
}

#[tokio::test]
async fn follow_feed_has_only_followed_authors() {
    let (cli, state) = setup().await;
    let (author, _) = login_as(&state, "TestAuthor").await;
    let (stranger, _) = login_as(&state, "stranger").await;
    let (_, auth) = login_as(&state, "TestUser").await;
    seed_post(&state, &author, "followed post", None).await;
    seed_post(&state, &stranger, "stranger post", None).await;

    cli.get("/profile/TestAuthor/follow/")
        .header(header::AUTHORIZATION, auth.as_str())
        .send()
        .await
        .assert_status(StatusCode::FOUND);

    let resp = cli
        .get("/follow/")
        .header(header::AUTHORIZATION, auth.as_str())
        .send()
        .await;
    resp.assert_status_is_ok();
    assert_eq!(texts(&body(resp).await), ["followed post"]);

    let (_, lonely) = login_as(&state, "lonely").await;
    let resp = cli
        .get("/follow/")
        .header(header::AUTHORIZATION, lonely.as_str())
        .send()
        .await;
    assert!(texts(&body(resp).await).is_empty());
}

#[tokio::test]
async fn protected_routes_redirect_anonymous_visitors() {
    let (cli, state) = setup().await;
    let (author, _) = login_as(&state, "TestAuthor").await;
    let post = seed_post(&state, &author, "text", None).await;

    let resp = cli.get("/follow/").send().await;
    resp.assert_status(StatusCode::FOUND);
    resp.assert_header(header::LOCATION, "/auth/login/?next=/follow/");

    let resp = cli.get("/profile/TestAuthor/follow/").send().await;
    resp.assert_header(header::LOCATION, "/auth/login/?next=/profile/TestAuthor/follow/");
    assert_eq!(follow::Entity::find().count(&state.db).await.unwrap(), 0);

    let resp = cli
        .post(format!("/posts/{}/comment/", post.id))
        .body_json(&json!({ "text": "hello" }))
        .send()
        .await;
    resp.assert_status(StatusCode::FOUND);
    resp.assert_header(
        header::LOCATION,
        format!("/auth/login/?next=/posts/{}/comment/", post.id),
    );
    assert_eq!(comment::Entity::find().count(&state.db).await.unwrap(), 0);
}

#[tokio::test]
async fn comments_take_their_author_from_the_session() {
    let (cli, state) = setup().await;
    let (author, _) = login_as(&state, "test_user").await;
    let (_, auth) = login_as(&state, "user").await;
    let post = seed_post(&state, &author, "text", None).await;

    let resp = cli
        .post(format!("/posts/{}/comment/", post.id))
        .header(header::AUTHORIZATION, auth.as_str())
        .body_json(&json!({ "text": "Test comment" }))
        .send()
        .await;
    resp.assert_status(StatusCode::FOUND);
    resp.assert_header(header::LOCATION, format!("/posts/{}/", post.id));

    let detail = body(cli.get(format!("/posts/{}/", post.id)).send().await).await;
    assert_eq!(detail["comments"][0]["text"], "Test comment");
    assert_eq!(detail["comments"][0]["author"]["username"], "user");
    assert_eq!(detail["author_post_count"], 1);
    assert_eq!(detail["can_edit"], false);

    let resp = cli
        .post(format!("/posts/{}/comment/", post.id))
        .header(header::AUTHORIZATION, auth.as_str())
        .body_json(&json!({ "text": "" }))
        .send()
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(comment::Entity::find().count(&state.db).await.unwrap(), 1);
}

#[tokio::test]
async fn index_is_cached_until_a_post_changes() {
    let (cli, state) = setup().await;
    let (author, auth) = login_as(&state, "test_user").await;
    seed_post(&state, &author, "first", None).await;

    assert_eq!(texts(&body(cli.get("/").send().await).await), ["first"]);

    // written behind the cache's back
    seed_post(&state, &author, "second", None).await;
    assert_eq!(texts(&body(cli.get("/").send().await).await), ["first"]);

    cli.post("/create/")
        .header(header::AUTHORIZATION, auth.as_str())
        .body_json(&json!({ "text": "third" }))
        .send()
        .await
        .assert_status(StatusCode::FOUND);
    assert_eq!(
        texts(&body(cli.get("/").send().await).await),
        ["third", "second", "first"]
    );
}

#[tokio::test]
async fn author_can_delete_post_and_comments_survive() {
    let (cli, state) = setup().await;
    let (author, auth) = login_as(&state, "test_user").await;
    let (_, other) = login_as(&state, "user").await;
    let post = seed_post(&state, &author, "doomed", None).await;
    cli.post(format!("/posts/{}/comment/", post.id))
        .header(header::AUTHORIZATION, other.as_str())
        .body_json(&json!({ "text": "bye" }))
        .send()
        .await
        .assert_status(StatusCode::FOUND);

    let resp = cli
        .post(format!("/posts/{}/delete/", post.id))
        .header(header::AUTHORIZATION, other.as_str())
        .send()
        .await;
    resp.assert_header(header::LOCATION, format!("/posts/{}/", post.id));
    assert_eq!(post_count(&state).await, 1);

    let resp = cli
        .post(format!("/posts/{}/delete/", post.id))
        .header(header::AUTHORIZATION, auth.as_str())
        .send()
        .await;
    resp.assert_status(StatusCode::FOUND);
    resp.assert_header(header::LOCATION, "/profile/test_user/");
    assert_eq!(post_count(&state).await, 0);

    let orphan = comment::Entity::find().one(&state.db).await.unwrap().unwrap();
    assert_eq!(orphan.post_id, None);
}

#[tokio::test]
async fn signup_login_and_use_the_token() {
    let (cli, _) = setup().await;

    let resp = cli
        .post("/auth/signup/")
        .body_json(&json!({ "username": "leo", "password": "war-and-peace" }))
        .send()
        .await;
    resp.assert_status_is_ok();
    assert_eq!(body(resp).await["username"], "leo");

    let resp = cli
        .post("/auth/signup/")
        .body_json(&json!({ "username": "leo", "password": "anna-karenina" }))
        .send()
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);

    let resp = cli
        .post("/auth/login/")
        .body_json(&json!({ "username": "leo", "password": "wrong-password" }))
        .send()
        .await;
    resp.assert_status(StatusCode::UNAUTHORIZED);

    let resp = cli
        .post("/auth/login/")
        .body_json(&json!({ "username": "leo", "password": "war-and-peace" }))
        .send()
        .await;
    resp.assert_status_is_ok();
    let token = body(resp).await["token"].as_str().unwrap().to_owned();

    cli.get("/follow/")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .send()
        .await
        .assert_status_is_ok();

    let page = body(cli.get("/auth/login/").query("next", &"/create/").send().await).await;
    assert_eq!(page["next"], "/create/");
}

#[tokio::test]
async fn deleted_account_hands_posts_to_fallback_author() {
    let (cli, state) = setup().await;
    let (admin, _) = login_as(&state, "admin").await;
    let (writer, auth) = login_as(&state, "writer").await;
    let post = seed_post(&state, &writer, "legacy", None).await;

    cli.post("/auth/delete/")
        .header(header::AUTHORIZATION, auth.as_str())
        .send()
        .await
        .assert_status(StatusCode::FOUND);

    assert_eq!(store::find_post(&state.db, post.id).await.unwrap().author_id, admin.id);
    cli.get("/profile/writer/")
        .send()
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn anonymous_submissions_redirect_whatever_the_body() {
    let (cli, state) = setup().await;
    let (author, _) = login_as(&state, "test_user").await;
    let post = seed_post(&state, &author, "text", None).await;

    let resp = cli.post("/create/").body_json(&json!({})).send().await;
    resp.assert_status(StatusCode::FOUND);
    resp.assert_header(header::LOCATION, "/auth/login/?next=/create/");

    let resp = cli
        .post(format!("/posts/{}/comment/", post.id))
        .body_json(&json!({ "text": 42 }))
        .send()
        .await;
    resp.assert_status(StatusCode::FOUND);
    resp.assert_header(
        header::LOCATION,
        format!("/auth/login/?next=/posts/{}/comment/", post.id),
    );
    assert_eq!(post_count(&state).await, 1);
    assert_eq!(comment::Entity::find().count(&state.db).await.unwrap(), 0);
}

#[tokio::test]
async fn incomplete_bodies_come_back_as_form_errors() {
    let (cli, state) = setup().await;
    let (author, auth) = login_as(&state, "test_user").await;
    let post = seed_post(&state, &author, "text", None).await;

    let resp = cli
        .post("/create/")
        .header(header::AUTHORIZATION, auth.as_str())
        .body_json(&json!({}))
        .send()
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    let page = body(resp).await;
    assert_eq!(page["page"], "form");
    assert!(page["errors"]["text"].is_array());

    let resp = cli
        .post(format!("/posts/{}/comment/", post.id))
        .header(header::AUTHORIZATION, auth.as_str())
        .body_json(&json!({}))
        .send()
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    assert!(body(resp).await["errors"]["text"].is_array());

    let resp = cli
        .post("/create/")
        .header(header::AUTHORIZATION, auth.as_str())
        .body_json(&json!({ "text": 42 }))
        .send()
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    let page = body(resp).await;
    assert_eq!(page["page"], "form");
    assert!(page["errors"]["__all__"].is_array());

    let resp = cli.post("/auth/signup/").body_json(&json!({})).send().await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(body(resp).await["page"], "form");

    assert_eq!(post_count(&state).await, 1);
    assert_eq!(comment::Entity::find().count(&state.db).await.unwrap(), 0);
}

#[tokio::test]
async fn unreadable_page_numbers_fall_back_to_the_first_page() {
    let (cli, state) = setup().await;
    let (author, _) = login_as(&state, "test_user").await;
    for i in 0..13 {
        seed_post(&state, &author, &format!("post {i}"), None).await;
    }

    for raw in ["abc", "-1", ""] {
        let resp = cli.get("/").query("page", &raw).send().await;
        resp.assert_status_is_ok();
        let page = body(resp).await;
        assert_eq!(page["number"], 1, "page={raw}");
        assert_eq!(texts(&page).len(), 10);
    }

    let resp = cli.get("/profile/test_user/").query("page", &"two").send().await;
    resp.assert_status_is_ok();
    assert_eq!(body(resp).await["page"]["number"], 1);
}

#[tokio::test]
async fn routes_answer_with_and_without_trailing_slash() {
    let (cli, state) = setup().await;
    let (author, auth) = login_as(&state, "test_user").await;
    let post = seed_post(&state, &author, "text", None).await;

    for path in [
        "/".to_owned(),
        "/profile/test_user".to_owned(),
        "/profile/test_user/".to_owned(),
        format!("/posts/{}", post.id),
        format!("/posts/{}/", post.id),
        "/auth/login".to_owned(),
        "/auth/login/".to_owned(),
    ] {
        cli.get(&path).send().await.assert_status_is_ok();
    }

    // the redirect target itself resolves
    let resp = cli.get("/follow").send().await;
    resp.assert_header(header::LOCATION, "/auth/login/?next=/follow");
    cli.get("/auth/login/")
        .query("next", &"/follow")
        .send()
        .await
        .assert_status_is_ok();

    cli.get("/follow/")
        .header(header::AUTHORIZATION, auth.as_str())
        .send()
        .await
        .assert_status_is_ok();
}
