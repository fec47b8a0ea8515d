//! Read side: the four post feeds and the post detail view.
//!
//! Every feed is ordered newest first (ties broken by id) and cut into pages of
//! [`PAGE_SIZE`]. Page numbers are 1-based; a missing or zero page is the first
//! page and a page past the end is the last one.

use std::collections::HashMap;

use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Select,
    sea_query::Query,
};

use crate::{
    cache::PageCache,
    entities::{comment, follow, group, post, user},
    error::{AppError, Result},
    follow::is_following,
};

pub const PAGE_SIZE: u64 = 10;

pub type FeedCache = PageCache<Page<FeedPost>>;

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub number: u64,
    pub num_pages: u64,
    pub count: u64,
}

impl<T> Page<T> {
    pub fn has_next(&self) -> bool {
        self.number < self.num_pages
    }

    pub fn has_previous(&self) -> bool {
        self.number > 1
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedPost {
    pub post: post::Model,
    pub author: Option<user::Model>,
    pub group: Option<group::Model>,
}

#[derive(Debug, Clone)]
pub struct GroupFeed {
    pub group: group::Model,
    pub page: Page<FeedPost>,
}

#[derive(Debug, Clone)]
pub struct ProfileFeed {
    pub author: user::Model,
    pub post_count: u64,
    /// Always false for anonymous viewers.
    pub following: bool,
    pub page: Page<FeedPost>,
}

#[derive(Debug, Clone)]
pub struct FeedComment {
    pub comment: comment::Model,
    pub author: Option<user::Model>,
}

#[derive(Debug, Clone)]
pub struct PostDetail {
    pub post: FeedPost,
    pub author_post_count: u64,
    pub comments: Vec<FeedComment>,
}

/// Page number from the raw `?page=` value. Anything but a non-negative integer reads as absent.
pub fn parse_page(raw: Option<&str>) -> Option<u64> {
    raw.and_then(|s| s.trim().parse().ok())
}

pub fn resolve_page(requested: Option<u64>, num_pages: u64) -> u64 {
    requested.unwrap_or(1).max(1).min(num_pages.max(1))
}

fn cache_key(route: &str, page: Option<u64>) -> String {
    format!("{route}?page={}", page.unwrap_or(1).max(1))
}

async fn paginate<C: ConnectionTrait>(
    db: &C,
    select: Select<post::Entity>,
    page: Option<u64>,
) -> Result<Page<FeedPost>> {
    let paginator = select
        .order_by_desc(post::Column::PubDate)
        .order_by_desc(post::Column::Id)
        .find_also_related(user::Entity)
        .paginate(db, PAGE_SIZE);
    let totals = paginator.num_items_and_pages().await?;
    let number = resolve_page(page, totals.number_of_pages);
    let rows = paginator.fetch_page(number - 1).await?;

    let group_ids: Vec<i32> = rows.iter().filter_map(|(p, _)| p.group_id).collect();
    let groups: HashMap<i32, group::Model> = if group_ids.is_empty() {
        HashMap::new()
    } else {
        group::Entity::find()
            .filter(group::Column::Id.is_in(group_ids))
            .all(db)
            .await?
            .into_iter()
            .map(|g| (g.id, g))
            .collect()
    };

    let items = rows
        .into_iter()
        .map(|(post, author)| {
            let group = post.group_id.and_then(|id| groups.get(&id).cloned());
            FeedPost {
                post,
                author,
                group,
            }
        })
        .collect();

    Ok(Page {
        items,
        number,
        num_pages: totals.number_of_pages.max(1),
        count: totals.number_of_items,
    })
}

pub async fn global_feed<C: ConnectionTrait>(
    db: &C,
    cache: &FeedCache,
    page: Option<u64>,
) -> Result<Page<FeedPost>> {
    cache
        .get_or_load(cache_key("/", page), || paginate(db, post::Entity::find(), page))
        .await
}

pub async fn group_feed<C: ConnectionTrait>(
    db: &C,
    cache: &FeedCache,
    slug: &str,
    page: Option<u64>,
) -> Result<GroupFeed> {
    let group = crate::store::find_group_by_slug(db, slug).await?;
    let select = post::Entity::find().filter(post::Column::GroupId.eq(group.id));
    let page = cache
        .get_or_load(cache_key(&group.absolute_url(), page), || {
            paginate(db, select, page)
        })
        .await?;
    Ok(GroupFeed { group, page })
}

pub async fn profile_feed<C: ConnectionTrait>(
    db: &C,
    cache: &FeedCache,
    username: &str,
    viewer: Option<&user::Model>,
    page: Option<u64>,
) -> Result<ProfileFeed> {
    let author = crate::store::find_user_by_username(db, username).await?;
    let select = post::Entity::find().filter(post::Column::AuthorId.eq(author.id));
    let page = cache
        .get_or_load(cache_key(&format!("/profile/{}/", author.username), page), || {
            paginate(db, select, page)
        })
        .await?;
    let following = match viewer {
        Some(viewer) => is_following(db, viewer.id, author.id).await?,
        None => false,
    };
    Ok(ProfileFeed {
        post_count: page.count,
        author,
        following,
        page,
    })
}

/// Posts by every author `viewer` follows. Never cached, it differs per viewer.
pub async fn follow_feed<C: ConnectionTrait>(
    db: &C,
    viewer: &user::Model,
    page: Option<u64>,
) -> Result<Page<FeedPost>> {
    let followed = Query::select()
        .column(follow::Column::AuthorId)
        .from(follow::Entity)
        .and_where(follow::Column::UserId.eq(viewer.id))
        .to_owned();
    let select = post::Entity::find().filter(post::Column::AuthorId.in_subquery(followed));
    paginate(db, select, page).await
}

pub async fn post_detail<C: ConnectionTrait>(db: &C, post_id: i32) -> Result<PostDetail> {
    let (post, author) = post::Entity::find_by_id(post_id)
        .find_also_related(user::Entity)
        .one(db)
        .await?
        .ok_or(AppError::NotFound("post"))?;
    let group = match post.group_id {
        Some(id) => group::Entity::find_by_id(id).one(db).await?,
        None => None,
    };
    let author_post_count = post::Entity::find()
        .filter(post::Column::AuthorId.eq(post.author_id))
        .count(db)
        .await?;
    let comments = comment::Entity::find()
        .filter(comment::Column::PostId.eq(post.id))
        .order_by_asc(comment::Column::Created)
        .order_by_asc(comment::Column::Id)
        .find_also_related(user::Entity)
        .all(db)
        .await?
        .into_iter()
        .map(|(comment, author)| FeedComment { comment, author })
        .collect();
    Ok(PostDetail {
        post: FeedPost {
            post,
            author,
            group,
        },
        author_post_count,
        comments,
    })
}
