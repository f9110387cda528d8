// Uploaders push an accepted weight to a backend. They log the outcome and
// return nothing: a failed upload is simply dropped and the next accepted
// weight is the retry.

use crate::api::ApiClient;
use crate::auth::Session;
use tracing::{error, info};

pub trait Uploader {
    fn upload(&mut self, weight: f64);
}

impl<U: Uploader + ?Sized> Uploader for Box<U> {
    fn upload(&mut self, weight: f64) {
        (**self).upload(weight)
    }
}

/// `PUT /weight` with the session's bearer token.
pub struct BearerUploader<'a> {
    api: &'a ApiClient,
    session: &'a Session,
}

impl<'a> BearerUploader<'a> {
    pub fn new(api: &'a ApiClient, session: &'a Session) -> Self {
        BearerUploader { api, session }
    }
}

impl Uploader for BearerUploader<'_> {
    fn upload(&mut self, weight: f64) {
        match self.api.put_weight(self.session.token(), weight) {
            Ok(reply) => info!("API answered: {} {}", reply.status.as_u16(), reply.body.trim()),
            Err(e) => error!("Error while sending to the API: {}", e),
        }
    }
}
