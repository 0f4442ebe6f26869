//! Axum + Askama pages for the Expertise Pro site.
//!
//! The review strip on the home page reads through the store's
//! fault-collapsing boundary: a broken database means a page with zero
//! reviews, never an error page. Nothing here touches the sync pipeline.

use std::sync::Arc;

use askama::Template;
use axum::{
    extract::State,
    response::{Html, IntoResponse, Response},
    routing::get,
    Form, Router,
};
use async_trait::async_trait;
use axum::http::StatusCode;
use expro_core::{Review, DEFAULT_DISPLAY_LIMIT};
use expro_store::ReviewStore;
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{error, info};

pub const CRATE_NAME: &str = "expro-web";

/// A booking form submission, validated and ready to notify the admin inbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingSubmission {
    pub service_type: String,
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub date: Option<String>,
    pub message: Option<String>,
}

impl BookingSubmission {
    /// Email subject line for the admin inbox, by service type.
    pub fn subject(&self) -> &'static str {
        match self.service_type.as_str() {
            "car_rental" => "New Car Rental Booking Request",
            "improvement_lessons" => "New Improvement Lesson Booking Request",
            _ => "New Booking Request",
        }
    }
}

/// Delivery seam for booking requests. The production transport (admin-inbox
/// email) lives outside this crate; the default implementation records the
/// submission in the process log.
#[async_trait]
pub trait BookingNotifier: Send + Sync {
    async fn booking_received(&self, submission: &BookingSubmission) -> anyhow::Result<()>;
}

#[derive(Default)]
pub struct LogNotifier;

#[async_trait]
impl BookingNotifier for LogNotifier {
    async fn booking_received(&self, submission: &BookingSubmission) -> anyhow::Result<()> {
        info!(
            subject = submission.subject(),
            service_type = %submission.service_type,
            full_name = %submission.full_name,
            email = %submission.email,
            "booking request received"
        );
        Ok(())
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: ReviewStore,
    pub notifier: Arc<dyn BookingNotifier>,
}

impl AppState {
    pub fn new(store: ReviewStore, notifier: Arc<dyn BookingNotifier>) -> Self {
        Self { store, notifier }
    }
}

/// Review shaped for template rendering.
#[derive(Debug, Clone)]
struct ReviewCard {
    author_name: String,
    stars: String,
    text: String,
}

impl From<Review> for ReviewCard {
    fn from(review: Review) -> Self {
        let rating = usize::from(review.rating.min(5));
        Self {
            author_name: review.author_name,
            stars: "★".repeat(rating),
            text: review.text,
        }
    }
}

#[derive(Template)]
#[template(path = "home.html")]
struct HomeTemplate {
    reviews: Vec<ReviewCard>,
}

#[derive(Template)]
#[template(path = "about.html")]
struct AboutTemplate;

#[derive(Template)]
#[template(path = "booking.html")]
struct BookingTemplate {
    notice: String,
    error: String,
}

#[derive(Debug, Deserialize, Default)]
struct BookingForm {
    #[serde(default)]
    service_type: String,
    #[serde(default)]
    full_name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    phone: String,
    #[serde(default)]
    date: String,
    #[serde(default)]
    message: String,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(home_handler))
        .route("/about", get(about_handler))
        .route("/booking", get(booking_page_handler).post(booking_submit_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "web server listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn home_handler(State(state): State<Arc<AppState>>) -> Response {
    let reviews = state
        .store
        .fetch_recent_or_empty(DEFAULT_DISPLAY_LIMIT)
        .await
        .into_iter()
        .map(ReviewCard::from)
        .collect();
    render_html(HomeTemplate { reviews })
}

async fn about_handler() -> Response {
    render_html(AboutTemplate)
}

async fn booking_page_handler() -> Response {
    render_html(BookingTemplate {
        notice: String::new(),
        error: String::new(),
    })
}

async fn booking_submit_handler(
    State(state): State<Arc<AppState>>,
    Form(form): Form<BookingForm>,
) -> Response {
    let Some(submission) = validate_booking(form) else {
        return render_html(BookingTemplate {
            notice: String::new(),
            error: "Please fill in your name and a valid email address.".to_string(),
        });
    };

    match state.notifier.booking_received(&submission).await {
        Ok(()) => render_html(BookingTemplate {
            notice: "Thank you! Your booking request has been sent.".to_string(),
            error: String::new(),
        }),
        Err(err) => {
            error!(%err, "booking notification failed");
            render_html(BookingTemplate {
                notice: String::new(),
                error: "We could not send your request. Please try again later.".to_string(),
            })
        }
    }
}

fn validate_booking(form: BookingForm) -> Option<BookingSubmission> {
    let full_name = form.full_name.trim();
    let email = form.email.trim();
    if full_name.is_empty() || email.is_empty() || !email.contains('@') {
        return None;
    }
    let optional = |value: String| {
        let trimmed = value.trim().to_string();
        (!trimmed.is_empty()).then_some(trimmed)
    };
    Some(BookingSubmission {
        service_type: form.service_type,
        full_name: full_name.to_string(),
        email: email.to_string(),
        phone: optional(form.phone),
        date: optional(form.date),
        message: optional(form.message),
    })
}

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => {
            error!(%err, "template render failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Html(String::new())).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use expro_core::ReviewCandidate;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn state_with_reviews(reviews: &[(&str, u8, &str)]) -> AppState {
        let store = ReviewStore::connect("sqlite::memory:").await.unwrap();
        for (author, rating, text) in reviews {
            store
                .insert_if_not_exists(&ReviewCandidate {
                    author_name: author.to_string(),
                    profile_photo_url: None,
                    rating: *rating,
                    review_lang: None,
                    text: text.to_string(),
                    time: None,
                })
                .await
                .unwrap();
        }
        AppState::new(store, Arc::new(LogNotifier))
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn home_renders_display_quality_reviews() {
        let state = state_with_reviews(&[("Jane", 5, "Great lessons"), ("Low", 2, "bad")]).await;
        let response = app(state)
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let text = body_text(response).await;
        assert!(text.contains("Jane"));
        assert!(text.contains("Great lessons"));
        assert!(!text.contains("Low"));
    }

    #[tokio::test]
    async fn home_degrades_to_no_reviews_on_storage_fault() {
        let state = state_with_reviews(&[("Jane", 5, "Great lessons")]).await;
        state.store.pool().close().await;
        let response = app(state)
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let text = body_text(response).await;
        assert!(text.contains("No reviews yet."));
    }

    #[tokio::test]
    async fn about_and_booking_pages_render() {
        let state = state_with_reviews(&[]).await;
        let router = app(state);
        for uri in ["/about", "/booking"] {
            let response = router
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "GET {uri}");
        }
    }

    #[tokio::test]
    async fn booking_post_accepts_valid_submission() {
        let state = state_with_reviews(&[]).await;
        let response = app(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/booking")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from(
                        "service_type=car_rental&full_name=John+Doe&email=john%40example.com",
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let text = body_text(response).await;
        assert!(text.contains("has been sent"));
    }

    #[tokio::test]
    async fn booking_post_rejects_missing_required_fields() {
        let state = state_with_reviews(&[]).await;
        let response = app(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/booking")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from("service_type=car_rental&full_name=&email=not-an-email"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let text = body_text(response).await;
        assert!(text.contains("flash-error"));
    }

    #[test]
    fn subject_varies_by_service_type() {
        let mut submission = BookingSubmission {
            service_type: "car_rental".into(),
            full_name: "John".into(),
            email: "john@example.com".into(),
            phone: None,
            date: None,
            message: None,
        };
        assert_eq!(submission.subject(), "New Car Rental Booking Request");
        submission.service_type = "improvement_lessons".into();
        assert_eq!(submission.subject(), "New Improvement Lesson Booking Request");
        submission.service_type = "something_else".into();
        assert_eq!(submission.subject(), "New Booking Request");
    }
}
