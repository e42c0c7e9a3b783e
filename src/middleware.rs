use crate::{api::Api, http_helpers::redirect_to_login};
use actix_web::{
    Error,
    body::EitherBody,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
    http::header,
    web::Data,
};
use log::{debug, error};
use std::{
    future::{Future, Ready, ready},
    pin::Pin,
    rc::Rc,
};

/// Redirects requests without a valid session cookie to `/login`
pub struct AuthMw;

impl<S, B> Transform<S, ServiceRequest> for AuthMw
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = AuthMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthMiddleware {
            service: Rc::new(service),
        }))
    }
}

pub struct AuthMiddleware<S> {
    service: Rc<S>,
}

type LocalBoxFuture<T> = Pin<Box<dyn Future<Output = T> + 'static>>;

impl<S, B> Service<ServiceRequest> for AuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();

        Box::pin(async move {
            let Some(api) = req.app_data::<Data<Api>>() else {
                error!("failed to get api from app data");
                return Ok(login_redirect(req));
            };

            let cookies = req
                .headers()
                .get_all(header::COOKIE)
                .filter_map(|value| value.to_str().ok());

            if api.is_authenticated(cookies) {
                let res = service.call(req).await?;
                Ok(res.map_into_left_body())
            } else {
                debug!("unauthenticated request to {}", req.path());
                Ok(login_redirect(req))
            }
        })
    }
}

fn login_redirect<B>(req: ServiceRequest) -> ServiceResponse<EitherBody<B>> {
    let (http_req, _) = req.into_parts();
    ServiceResponse::new(http_req, redirect_to_login()).map_into_right_body()
}
