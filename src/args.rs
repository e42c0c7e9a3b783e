//! Request arguments as the device's web server sees them: the query string
//! followed by an url-encoded form body, in request order.

use actix_web::{FromRequest, HttpMessage, HttpRequest, dev::Payload, web};
use std::{future::Future, pin::Pin};

type LocalBoxFuture<T> = Pin<Box<dyn Future<Output = T> + 'static>>;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestArgs(Vec<(String, String)>);

impl RequestArgs {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// First value submitted under `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RequestArgs {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl FromRequest for RequestArgs {
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, payload: &mut Payload) -> Self::Future {
        let query = web::Query::<Vec<(String, String)>>::from_query(req.query_string());
        let form = (req.content_type() == FORM_CONTENT_TYPE)
            .then(|| web::Form::<Vec<(String, String)>>::from_request(req, payload));

        Box::pin(async move {
            let mut pairs = query?.into_inner();

            if let Some(form) = form {
                pairs.extend(form.await?.into_inner());
            }

            Ok(RequestArgs(pairs))
        })
    }
}

/// Lenient integer parsing: leading digits with an optional sign, zero if there are none.
pub fn to_int(value: &str) -> i64 {
    let value = value.trim_start();
    let (negative, digits) = match value.as_bytes().first() {
        Some(b'-') => (true, &value[1..]),
        Some(b'+') => (false, &value[1..]),
        _ => (false, value),
    };

    let magnitude = digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0i64, |acc, digit| {
            acc.saturating_mul(10).saturating_add(i64::from(digit - b'0'))
        });

    if negative { -magnitude } else { magnitude }
}
