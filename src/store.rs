//! Write side of the entity store. Every mutation validates its form first and
//! maps constraint violations onto form errors, so nothing half-valid is persisted.

use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait, sea_query::Expr,
};
use tracing::info;
use validator::Validate;

use crate::{
    entities::{comment, group, post, user},
    error::{AppError, Result},
    forms::{CommentForm, GroupForm, PostForm},
};

pub async fn create_user<C: ConnectionTrait>(
    db: &C,
    username: &str,
    password_hash: String,
) -> Result<user::Model> {
    let exists = user::Entity::find()
        .filter(user::Column::Username.eq(username))
        .one(db)
        .await?
        .is_some();
    if exists {
        return Err(AppError::invalid("username", "A user with that username already exists."));
    }
    let created = user::ActiveModel {
        username: Set(username.to_owned()),
        password_hash: Set(password_hash),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(|e| AppError::from_write(e, "username", "A user with that username already exists."))?;
    info!(user_id = created.id, username = %created.username, "user created");
    Ok(created)
}

pub async fn find_user_by_username<C: ConnectionTrait>(db: &C, username: &str) -> Result<user::Model> {
    user::Entity::find()
        .filter(user::Column::Username.eq(username))
        .one(db)
        .await?
        .ok_or(AppError::NotFound("user"))
}

/// Deletes a user. Their posts move to `fallback_author_id`, their comments keep
/// existing without an author and their follow records go with them.
pub async fn delete_user(
    db: &DatabaseConnection,
    user_id: i32,
    fallback_author_id: i32,
) -> Result<()> {
    if user_id == fallback_author_id {
        return Err(AppError::invalid("user", "The fallback author cannot be deleted."));
    }
    let txn = db.begin().await?;
    user::Entity::find_by_id(fallback_author_id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::Internal(format!("fallback author {fallback_author_id} is missing")))?;
    let moved = post::Entity::update_many()
        .col_expr(post::Column::AuthorId, Expr::value(fallback_author_id))
        .filter(post::Column::AuthorId.eq(user_id))
        .exec(&txn)
        .await?;
    let res = user::Entity::delete_by_id(user_id).exec(&txn).await?;
    if res.rows_affected == 0 {
        return Err(AppError::NotFound("user"));
    }
    txn.commit().await?;
    info!(user_id, posts_moved = moved.rows_affected, "user deleted");
    Ok(())
}

pub async fn create_group<C: ConnectionTrait>(db: &C, form: &GroupForm) -> Result<group::Model> {
    form.validate()?;
    let taken = group::Entity::find()
        .filter(group::Column::Slug.eq(form.slug.as_str()))
        .one(db)
        .await?
        .is_some();
    if taken {
        return Err(AppError::invalid("slug", "Group with this slug already exists."));
    }
    let created = group::ActiveModel {
        title: Set(form.title.clone()),
        slug: Set(form.slug.clone()),
        description: Set(form.description.clone()),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(|e| AppError::from_write(e, "slug", "Group with this slug already exists."))?;
    info!(group_id = created.id, slug = %created.slug, "group created");
    Ok(created)
}

pub async fn find_group_by_slug<C: ConnectionTrait>(db: &C, slug: &str) -> Result<group::Model> {
    group::Entity::find()
        .filter(group::Column::Slug.eq(slug))
        .one(db)
        .await?
        .ok_or(AppError::NotFound("group"))
}

pub async fn list_groups<C: ConnectionTrait>(db: &C) -> Result<Vec<group::Model>> {
    Ok(group::Entity::find()
        .order_by_asc(group::Column::Title)
        .all(db)
        .await?)
}

/// Posts of the group stay, without a group.
pub async fn delete_group<C: ConnectionTrait>(db: &C, group_id: i32) -> Result<()> {
    let res = group::Entity::delete_by_id(group_id).exec(db).await?;
    if res.rows_affected == 0 {
        return Err(AppError::NotFound("group"));
    }
    info!(group_id, "group deleted");
    Ok(())
}

pub async fn find_post<C: ConnectionTrait>(db: &C, post_id: i32) -> Result<post::Model> {
    post::Entity::find_by_id(post_id)
        .one(db)
        .await?
        .ok_or(AppError::NotFound("post"))
}

async fn check_group<C: ConnectionTrait>(db: &C, group_id: Option<i32>) -> Result<()> {
    let Some(id) = group_id else {
        return Ok(());
    };
    match group::Entity::find_by_id(id).one(db).await? {
        Some(_) => Ok(()),
        None => Err(AppError::invalid(
            "group",
            "Select a valid choice. That choice is not one of the available choices.",
        )),
    }
}

pub async fn create_post<C: ConnectionTrait>(
    db: &C,
    author_id: i32,
    form: &PostForm,
) -> Result<post::Model> {
    form.validate()?;
    check_group(db, form.group).await?;
    let created = post::ActiveModel {
        text: Set(form.text.clone()),
        author_id: Set(author_id),
        group_id: Set(form.group),
        image: Set(form.image.clone()),
        ..Default::default()
    }
    .insert(db)
    .await?;
    info!(post_id = created.id, author_id, excerpt = %created.excerpt(), "post created");
    Ok(created)
}

/// Applies the form to an existing post. Author and publication date never change.
pub async fn update_post<C: ConnectionTrait>(
    db: &C,
    post: post::Model,
    form: &PostForm,
) -> Result<post::Model> {
    form.validate()?;
    check_group(db, form.group).await?;
    let mut am: post::ActiveModel = post.into();
    am.text = Set(form.text.clone());
    am.group_id = Set(form.group);
    if form.image.is_some() {
        am.image = Set(form.image.clone());
    } else if form.clear_image {
        am.image = Set(None);
    }
    let updated = am.update(db).await?;
    info!(post_id = updated.id, excerpt = %updated.excerpt(), "post updated");
    Ok(updated)
}

/// Comments of the post stay, detached from it.
pub async fn delete_post<C: ConnectionTrait>(db: &C, post: &post::Model) -> Result<()> {
    post::Entity::delete_by_id(post.id).exec(db).await?;
    info!(post_id = post.id, excerpt = %post.excerpt(), "post deleted");
    Ok(())
}

pub async fn add_comment<C: ConnectionTrait>(
    db: &C,
    post: &post::Model,
    author_id: i32,
    form: &CommentForm,
) -> Result<comment::Model> {
    form.validate()?;
    let created = comment::ActiveModel {
        post_id: Set(Some(post.id)),
        author_id: Set(Some(author_id)),
        text: Set(form.text.clone()),
        ..Default::default()
    }
    .insert(db)
    .await?;
    info!(comment_id = created.id, post_id = post.id, author_id, "comment added");
    Ok(created)
}
