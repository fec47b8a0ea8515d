use poem_openapi::Object;
use validator::{Validate, ValidationError};

/// Rejects input that is empty once surrounding whitespace is dropped.
fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("required");
        err.message = Some("This field is required.".into());
        return Err(err);
    }
    Ok(())
}

fn slug(value: &str) -> Result<(), ValidationError> {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        let mut err = ValidationError::new("invalid_slug");
        err.message = Some("Enter a valid slug of letters, numbers, underscores or hyphens.".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Clone, Default, Object, Validate)]
pub struct PostForm {
    #[oai(default)]
    #[validate(custom(function = "not_blank"))]
    pub text: String,
    /// Group id; absent when the post has no group.
    pub group: Option<i32>,
    /// Reference to an already stored image. Leaving it out on edit keeps the current one.
    #[validate(length(max = 255))]
    pub image: Option<String>,
    /// Drops the current image on edit. Ignored when `image` is given.
    #[oai(default)]
    pub clear_image: bool,
}

#[derive(Debug, Clone, Default, Object, Validate)]
pub struct CommentForm {
    #[oai(default)]
    #[validate(custom(function = "not_blank"))]
    pub text: String,
}

#[derive(Debug, Clone, Default, Object, Validate)]
pub struct GroupForm {
    #[validate(length(max = 200))]
    pub title: String,
    #[validate(length(max = 50), custom(function = "slug"))]
    pub slug: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, Object, Validate)]
pub struct SignupForm {
    #[validate(length(min = 1, max = 150), custom(function = "username"))]
    pub username: String,
    #[validate(length(min = 8, message = "Password must contain at least 8 characters."))]
    pub password: String,
}

#[derive(Debug, Clone, Default, Object, Validate)]
pub struct LoginForm {
    #[validate(custom(function = "not_blank"))]
    pub username: String,
    #[validate(length(min = 1))]
    pub password: String,
}

/// Letters, digits and `@ . + - _`.
fn username(value: &str) -> Result<(), ValidationError> {
    if value
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_'))
    {
        return Ok(());
    }
    let mut err = ValidationError::new("invalid_username");
    err.message = Some("Enter a valid username.".into());
    Err(err)
}
