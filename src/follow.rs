use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, Set,
    SqlErr,
};
use tracing::info;

use crate::{
    entities::{follow, user},
    error::Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowState {
    NotFollowing,
    Following,
}

/// What a follow or unfollow request did to the (follower, author) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Followed,
    Unfollowed,
    Unchanged(FollowState),
    /// Users cannot follow themselves.
    SelfFollowRejected,
}

pub async fn is_following<C: ConnectionTrait>(db: &C, user_id: i32, author_id: i32) -> Result<bool> {
    let n = follow::Entity::find()
        .filter(follow::Column::UserId.eq(user_id))
        .filter(follow::Column::AuthorId.eq(author_id))
        .count(db)
        .await?;
    Ok(n > 0)
}

pub async fn state<C: ConnectionTrait>(db: &C, user_id: i32, author_id: i32) -> Result<FollowState> {
    Ok(if is_following(db, user_id, author_id).await? {
        FollowState::Following
    } else {
        FollowState::NotFollowing
    })
}

pub async fn follow<C: ConnectionTrait>(
    db: &C,
    follower: &user::Model,
    author: &user::Model,
) -> Result<Transition> {
    if follower.id == author.id {
        return Ok(Transition::SelfFollowRejected);
    }
    if is_following(db, follower.id, author.id).await? {
        return Ok(Transition::Unchanged(FollowState::Following));
    }
    let inserted = follow::ActiveModel {
        user_id: Set(follower.id),
        author_id: Set(author.id),
        ..Default::default()
    }
    .insert(db)
    .await;
    match inserted {
        Ok(_) => {
            info!(follower = %follower.username, author = %author.username, "followed");
            Ok(Transition::Followed)
        }
        // lost a race against an identical request
        Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
            Ok(Transition::Unchanged(FollowState::Following))
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn unfollow<C: ConnectionTrait>(
    db: &C,
    follower: &user::Model,
    author: &user::Model,
) -> Result<Transition> {
    let res = follow::Entity::delete_many()
        .filter(follow::Column::UserId.eq(follower.id))
        .filter(follow::Column::AuthorId.eq(author.id))
        .exec(db)
        .await?;
    if res.rows_affected == 0 {
        return Ok(Transition::Unchanged(FollowState::NotFollowing));
    }
    info!(follower = %follower.username, author = %author.username, "unfollowed");
    Ok(Transition::Unfollowed)
}
