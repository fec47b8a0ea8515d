// api.rs
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use poem_openapi::{
    ApiResponse, Object, OpenApi,
    param::{Path, Query},
    payload::Json,
    types::ParseFromJSON,
};
use serde_json::Value;
use tracing::info;

use crate::{
    AppState,
    auth::{self, Viewer},
    entities::{group, user},
    error::{AppError, NON_FIELD_ERRORS},
    feed::{self, FeedComment, FeedPost, Page},
    follow::{self, Transition},
    forms::{CommentForm, LoginForm, PostForm, SignupForm},
    store,
};

#[derive(Object)]
pub struct AuthorView {
    pub id: i32,
    pub username: String,
}

impl From<&user::Model> for AuthorView {
    fn from(u: &user::Model) -> Self {
        AuthorView {
            id: u.id,
            username: u.username.clone(),
        }
    }
}

#[derive(Object)]
pub struct GroupView {
    pub id: i32,
    pub title: String,
    pub slug: String,
    pub description: String,
    pub url: String,
}

impl From<&group::Model> for GroupView {
    fn from(g: &group::Model) -> Self {
        GroupView {
            id: g.id,
            title: g.title.clone(),
            slug: g.slug.clone(),
            description: g.description.clone(),
            url: g.absolute_url(),
        }
    }
}

#[derive(Object)]
pub struct PostView {
    pub id: i32,
    pub text: String,
    pub pub_date: DateTime<FixedOffset>,
    pub image: Option<String>,
    pub author: AuthorView,
    pub group: Option<GroupView>,
}

impl From<FeedPost> for PostView {
    fn from(item: FeedPost) -> Self {
        let FeedPost {
            post,
            author,
            group,
        } = item;
        PostView {
            author: AuthorView {
                id: post.author_id,
                username: author.map(|a| a.username).unwrap_or_default(),
            },
            group: group.as_ref().map(GroupView::from),
            id: post.id,
            text: post.text,
            pub_date: post.pub_date,
            image: post.image,
        }
    }
}

#[derive(Object)]
pub struct FeedPage {
    pub posts: Vec<PostView>,
    pub number: u64,
    pub num_pages: u64,
    pub count: u64,
    pub has_next: bool,
    pub has_previous: bool,
}

impl From<Page<FeedPost>> for FeedPage {
    fn from(page: Page<FeedPost>) -> Self {
        FeedPage {
            has_next: page.has_next(),
            has_previous: page.has_previous(),
            number: page.number,
            num_pages: page.num_pages,
            count: page.count,
            posts: page.items.into_iter().map(PostView::from).collect(),
        }
    }
}

#[derive(Object)]
pub struct GroupFeedView {
    pub group: GroupView,
    pub page: FeedPage,
}

#[derive(Object)]
pub struct ProfileView {
    pub author: AuthorView,
    pub post_count: u64,
    pub following: bool,
    pub page: FeedPage,
}

#[derive(Object)]
pub struct CommentView {
    pub id: i32,
    pub text: String,
    pub created: DateTime<FixedOffset>,
    pub author: Option<AuthorView>,
}

impl From<FeedComment> for CommentView {
    fn from(c: FeedComment) -> Self {
        CommentView {
            author: c.author.as_ref().map(AuthorView::from),
            id: c.comment.id,
            text: c.comment.text,
            created: c.comment.created,
        }
    }
}

#[derive(Object)]
pub struct PostDetailView {
    pub post: PostView,
    pub author_post_count: u64,
    pub comments: Vec<CommentView>,
    /// True when the viewer wrote the post.
    pub can_edit: bool,
}

#[derive(Object)]
pub struct PostFormView {
    pub is_edit: bool,
    pub groups: Vec<GroupView>,
    pub post: Option<PostView>,
}

#[derive(Object)]
pub struct LoginPageView {
    pub next: Option<String>,
}

#[derive(Object)]
pub struct TokenView {
    pub username: String,
    pub token: String,
}

#[derive(ApiResponse)]
pub enum Redirect {
    #[oai(status = 302)]
    Found(#[oai(header = "Location")] String),
}

#[derive(ApiResponse)]
pub enum FormPage {
    #[oai(status = 200)]
    Ok(Json<PostFormView>),
    #[oai(status = 302)]
    Found(#[oai(header = "Location")] String),
}

#[derive(ApiResponse)]
pub enum FollowFeed {
    #[oai(status = 200)]
    Ok(Json<FeedPage>),
    #[oai(status = 302)]
    Found(#[oai(header = "Location")] String),
}

fn post_url(post_id: i32) -> String {
    format!("/posts/{post_id}/")
}

fn profile_url(username: &str) -> String {
    format!("/profile/{username}/")
}

/// Reads a form out of a request body. Called after the login check so anonymous
/// submissions are redirected whatever they sent.
fn read_form<T: ParseFromJSON>(body: Value) -> Result<T, AppError> {
    T::parse_from_json(Some(body)).map_err(|e| AppError::invalid(NON_FIELD_ERRORS, e.into_message()))
}

/// Logged-in user of `viewer`, otherwise return the login redirect from the handler.
macro_rules! login_required {
    ($viewer:expr, $found:path) => {
        match $viewer.require_login() {
            Ok(user) => user,
            Err(login) => return Ok($found(login)),
        }
    };
}

pub struct Api {
    state: Arc<AppState>,
}

impl Api {
    pub fn new(state: Arc<AppState>) -> Self {
        Api { state }
    }

    async fn group_choices(&self) -> poem::Result<Vec<GroupView>> {
        let groups = store::list_groups(&self.state.db).await?;
        Ok(groups.iter().map(GroupView::from).collect())
    }

    async fn follow_action(&self, viewer: Viewer, username: String, on: bool) -> poem::Result<Redirect> {
        let user = login_required!(viewer, Redirect::Found);
        let author = store::find_user_by_username(&self.state.db, &username).await?;
        let transition = if on {
            follow::follow(&self.state.db, user, &author).await?
        } else {
            follow::unfollow(&self.state.db, user, &author).await?
        };
        if transition == Transition::SelfFollowRejected {
            info!(username = %user.username, "self-follow ignored");
        }
        Ok(Redirect::Found(profile_url(&author.username)))
    }
}

#[OpenApi]
impl Api {
    /// 전체 피드
    #[oai(path = "/", method = "get")]
    async fn index(&self, Query(page): Query<Option<String>>) -> poem::Result<Json<FeedPage>> {
        let page = feed::parse_page(page.as_deref());
        let page = feed::global_feed(&self.state.db, &self.state.cache, page).await?;
        Ok(Json(page.into()))
    }

    /// 그룹 피드
    #[oai(path = "/group/:slug", method = "get")]
    async fn group_posts(
        &self,
        Path(slug): Path<String>,
        Query(page): Query<Option<String>>,
    ) -> poem::Result<Json<GroupFeedView>> {
        let page = feed::parse_page(page.as_deref());
        let feed = feed::group_feed(&self.state.db, &self.state.cache, &slug, page).await?;
        Ok(Json(GroupFeedView {
            group: GroupView::from(&feed.group),
            page: feed.page.into(),
        }))
    }

    /// 작성자 프로필
    #[oai(path = "/profile/:username", method = "get")]
    async fn profile(
        &self,
        viewer: Viewer,
        Path(username): Path<String>,
        Query(page): Query<Option<String>>,
    ) -> poem::Result<Json<ProfileView>> {
        let page = feed::parse_page(page.as_deref());
        let feed = feed::profile_feed(
            &self.state.db,
            &self.state.cache,
            &username,
            viewer.user.as_ref(),
            page,
        )
        .await?;
        Ok(Json(ProfileView {
            author: AuthorView::from(&feed.author),
            post_count: feed.post_count,
            following: feed.following,
            page: feed.page.into(),
        }))
    }

    /// 단건 조회 + 댓글
    #[oai(path = "/posts/:post_id", method = "get")]
    async fn post_detail(&self, viewer: Viewer, Path(post_id): Path<i32>) -> poem::Result<Json<PostDetailView>> {
        let detail = feed::post_detail(&self.state.db, post_id).await?;
        let can_edit = viewer
            .user
            .as_ref()
            .is_some_and(|u| u.id == detail.post.post.author_id);
        Ok(Json(PostDetailView {
            can_edit,
            author_post_count: detail.author_post_count,
            post: detail.post.into(),
            comments: detail.comments.into_iter().map(CommentView::from).collect(),
        }))
    }

    /// 작성 폼
    #[oai(path = "/create", method = "get")]
    async fn post_create_form(&self, viewer: Viewer) -> poem::Result<FormPage> {
        login_required!(viewer, FormPage::Found);
        Ok(FormPage::Ok(Json(PostFormView {
            is_edit: false,
            groups: self.group_choices().await?,
            post: None,
        })))
    }

    /// 생성
    #[oai(path = "/create", method = "post")]
    async fn post_create(&self, viewer: Viewer, Json(body): Json<Value>) -> poem::Result<Redirect> {
        let user = login_required!(viewer, Redirect::Found);
        let form: PostForm = read_form(body)?;
        store::create_post(&self.state.db, user.id, &form).await?;
        self.state.cache.invalidate();
        Ok(Redirect::Found(profile_url(&user.username)))
    }

    /// 수정 폼
    #[oai(path = "/posts/:post_id/edit", method = "get")]
    async fn post_edit_form(&self, viewer: Viewer, Path(post_id): Path<i32>) -> poem::Result<FormPage> {
        let user = login_required!(viewer, FormPage::Found);
        let detail = feed::post_detail(&self.state.db, post_id).await?;
        if detail.post.post.author_id != user.id {
            return Ok(FormPage::Found(post_url(post_id)));
        }
        Ok(FormPage::Ok(Json(PostFormView {
            is_edit: true,
            groups: self.group_choices().await?,
            post: Some(detail.post.into()),
        })))
    }

    /// 수정
    #[oai(path = "/posts/:post_id/edit", method = "post")]
    async fn post_edit(
        &self,
        viewer: Viewer,
        Path(post_id): Path<i32>,
        Json(body): Json<Value>,
    ) -> poem::Result<Redirect> {
        let user = login_required!(viewer, Redirect::Found);
        let post = store::find_post(&self.state.db, post_id).await?;
        if post.author_id != user.id {
            return Ok(Redirect::Found(post_url(post_id)));
        }
        let form: PostForm = read_form(body)?;
        store::update_post(&self.state.db, post, &form).await?;
        self.state.cache.invalidate();
        Ok(Redirect::Found(post_url(post_id)))
    }

    /// 삭제
    #[oai(path = "/posts/:post_id/delete", method = "post")]
    async fn post_delete(&self, viewer: Viewer, Path(post_id): Path<i32>) -> poem::Result<Redirect> {
        let user = login_required!(viewer, Redirect::Found);
        let post = store::find_post(&self.state.db, post_id).await?;
        if post.author_id != user.id {
            return Ok(Redirect::Found(post_url(post_id)));
        }
        store::delete_post(&self.state.db, &post).await?;
        self.state.cache.invalidate();
        Ok(Redirect::Found(profile_url(&user.username)))
    }

    /// 댓글 작성
    #[oai(path = "/posts/:post_id/comment", method = "post")]
    async fn add_comment(
        &self,
        viewer: Viewer,
        Path(post_id): Path<i32>,
        Json(body): Json<Value>,
    ) -> poem::Result<Redirect> {
        let user = login_required!(viewer, Redirect::Found);
        let form: CommentForm = read_form(body)?;
        let post = store::find_post(&self.state.db, post_id).await?;
        store::add_comment(&self.state.db, &post, user.id, &form).await?;
        Ok(Redirect::Found(post_url(post_id)))
    }

    /// 구독 피드
    #[oai(path = "/follow", method = "get")]
    async fn follow_index(&self, viewer: Viewer, Query(page): Query<Option<String>>) -> poem::Result<FollowFeed> {
        let user = login_required!(viewer, FollowFeed::Found);
        let page = feed::parse_page(page.as_deref());
        let page = feed::follow_feed(&self.state.db, user, page).await?;
        Ok(FollowFeed::Ok(Json(page.into())))
    }

    /// 구독
    #[oai(path = "/profile/:username/follow", method = "get")]
    async fn profile_follow(&self, viewer: Viewer, Path(username): Path<String>) -> poem::Result<Redirect> {
        self.follow_action(viewer, username, true).await
    }

    /// 구독 (POST)
    #[oai(path = "/profile/:username/follow", method = "post")]
    async fn profile_follow_post(&self, viewer: Viewer, Path(username): Path<String>) -> poem::Result<Redirect> {
        self.follow_action(viewer, username, true).await
    }

    /// 구독 취소
    #[oai(path = "/profile/:username/unfollow", method = "get")]
    async fn profile_unfollow(&self, viewer: Viewer, Path(username): Path<String>) -> poem::Result<Redirect> {
        self.follow_action(viewer, username, false).await
    }

    /// 구독 취소 (POST)
    #[oai(path = "/profile/:username/unfollow", method = "post")]
    async fn profile_unfollow_post(&self, viewer: Viewer, Path(username): Path<String>) -> poem::Result<Redirect> {
        self.follow_action(viewer, username, false).await
    }

    /// 회원 가입
    #[oai(path = "/auth/signup", method = "post")]
    async fn signup(&self, Json(form): Json<SignupForm>) -> poem::Result<Json<AuthorView>> {
        let user = auth::signup(&self.state.db, &form).await?;
        Ok(Json(AuthorView::from(&user)))
    }

    /// 로그인 페이지
    #[oai(path = "/auth/login", method = "get")]
    async fn login_page(&self, Query(next): Query<Option<String>>) -> Json<LoginPageView> {
        Json(LoginPageView { next })
    }

    /// 로그인 (토큰 발급)
    #[oai(path = "/auth/login", method = "post")]
    async fn login(&self, Json(form): Json<LoginForm>) -> poem::Result<Json<TokenView>> {
        let (user, token) = auth::login(&self.state.db, &self.state.tokens, &form).await?;
        Ok(Json(TokenView {
            username: user.username,
            token,
        }))
    }

    /// 회원 탈퇴
    #[oai(path = "/auth/delete", method = "post")]
    async fn delete_account(&self, viewer: Viewer) -> poem::Result<Redirect> {
        let user = login_required!(viewer, Redirect::Found);
        store::delete_user(&self.state.db, user.id, self.state.fallback_author_id).await?;
        self.state.cache.invalidate();
        Ok(Redirect::Found("/".to_owned()))
    }
}
