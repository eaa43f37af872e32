use askama::Template;
use askama_web::WebTemplate;

use beacon_types::api::SerializedMessage;

/// HTML fragment listing the viewer's messages. Content is escaped unless
/// the message was marked safe.
#[derive(Template, WebTemplate)]
#[template(path = "banner.html")]
pub struct BannerTemplate {
    pub messages: Vec<SerializedMessage>,
}
