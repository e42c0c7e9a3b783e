use crate::{
    args::{RequestArgs, to_int},
    device::{DeviceControl, UpdateNotifier},
    http_helpers::{
        ServiceResultResponse, TEXT_HTML, TEXT_PLAIN, close_connection, fail,
        handle_service_result, html, no_cache,
    },
    link_status::LinkStatusProvider,
    log_buffer::LogProvider,
    middleware::AuthMw,
    services::{
        auth::{AuthenticationService, CLEARED_SESSION, LoginOutcome, SESSION_COOKIE},
        configuration::{BAD_ARGUMENT, ConfigCategory, ConfigurationService},
        firmware::{FirmwareUpdate, UploadEvent},
        parameters::{ParameterStore, Parameters},
        status::{StatusCache, StatusService},
    },
    templates::{self, Value},
};
use actix_multipart::Multipart;
use actix_web::{
    HttpRequest, HttpResponse, Responder,
    http::{Method, StatusCode, header},
    web,
};
use anyhow::Context;
use futures_util::StreamExt;
use log::{debug, error, info};
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

const UNCLASSIFIED_EDIT: &str = "unknown error";

/// Collaborators of the web interface
pub struct DeviceContext {
    pub store: Box<dyn ParameterStore>,
    pub device: Box<dyn DeviceControl>,
    pub notifier: Box<dyn UpdateNotifier>,
    /// Ground station side of the bridge
    pub gcs: Arc<dyn LinkStatusProvider>,
    /// Vehicle side of the bridge
    pub vehicle: Arc<dyn LinkStatusProvider>,
    pub log: Arc<dyn LogProvider>,
    /// Delay between answering a request and restarting the device
    pub restart_delay: Duration,
}

struct ApiState {
    context: DeviceContext,
    upload: FirmwareUpdate,
    status_cache: StatusCache,
}

#[derive(Clone)]
pub struct Api {
    state: Arc<Mutex<ApiState>>,
}

impl Api {
    pub fn new(context: DeviceContext) -> Self {
        Api {
            state: Arc::new(Mutex::new(ApiState {
                context,
                upload: FirmwareUpdate::new(),
                status_cache: StatusCache::default(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ApiState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_authenticated<'a>(&self, cookie_headers: impl IntoIterator<Item = &'a str>) -> bool {
        AuthenticationService::is_authenticated(
            self.lock().context.store.parameters(),
            cookie_headers,
        )
    }

    pub async fn login(api: web::Data<Self>, args: RequestArgs) -> impl Responder {
        debug!("login() called");

        if args.has("DISCONNECT") {
            return HttpResponse::MovedPermanently()
                .insert_header((
                    header::SET_COOKIE,
                    format!("{SESSION_COOKIE}={CLEARED_SESSION}"),
                ))
                .insert_header((header::LOCATION, "/login"))
                .insert_header((header::CACHE_CONTROL, "no-cache"))
                .finish();
        }

        let mut message = String::new();

        if let (Some(account), Some(password)) = (args.get("USERNAME"), args.get("PASSWORD")) {
            let state = api.lock();
            let parameters = state.context.store.parameters();

            match AuthenticationService::login(parameters, account, password) {
                LoginOutcome::Granted(token) => {
                    info!("login of {account} succeeded");
                    return no_cache(&mut HttpResponse::Ok())
                        .insert_header((header::SET_COOKIE, token.cookie_pair()))
                        .content_type(TEXT_HTML)
                        .body(templates::page(&render_config_view(
                            ConfigCategory::System,
                            parameters,
                        )));
                }
                LoginOutcome::Denied(denied) => {
                    info!("login of {account} failed");
                    message = denied;
                }
            }
        }

        html(
            StatusCode::OK,
            &templates::LOGIN_FORM.render(&[("msg", message.into())]),
        )
    }

    pub async fn help() -> impl Responder {
        debug!("help() called");
        html(StatusCode::OK, &templates::HELP.render(&[]))
    }

    pub async fn get_sys_config(api: web::Data<Self>) -> impl Responder {
        debug!("get_sys_config() called");
        api.config_view(ConfigCategory::System)
    }

    pub async fn get_ap_config(api: web::Data<Self>) -> impl Responder {
        debug!("get_ap_config() called");
        api.config_view(ConfigCategory::AccessPoint)
    }

    pub async fn get_sta_config(api: web::Data<Self>) -> impl Responder {
        debug!("get_sta_config() called");
        api.config_view(ConfigCategory::Station)
    }

    pub async fn set_parameters(api: web::Data<Self>, args: RequestArgs) -> impl Responder {
        debug!("set_parameters() called");

        let mut state = api.lock();
        let state = &mut *state;

        let summary = match ConfigurationService::apply_edits(
            state.context.store.parameters_mut(),
            &args,
        ) {
            Ok(summary) => summary,
            Err(e) => {
                error!("set_parameters failed: {e}");
                // fields validated before the rejection stay in the live record
                state.status_cache.invalidate();
                return fail(BAD_ARGUMENT);
            }
        };

        if let Err(e) = state
            .context
            .store
            .persist_all()
            .context("failed to persist parameters")
        {
            return handle_service_result::<HttpResponse>(Err(e), "set_parameters");
        }
        state.status_cache.invalidate();

        let response = match summary.view() {
            Some(view) => html(
                StatusCode::OK,
                &render_config_view(view, state.context.store.parameters()),
            ),
            None => fail(UNCLASSIFIED_EDIT),
        };

        if summary.reboot {
            api.schedule_restart(state.context.restart_delay);
        }

        response
    }

    pub async fn get_status(api: web::Data<Self>) -> impl Responder {
        debug!("get_status() called");

        let mut state = api.lock();
        let state = &mut *state;
        let context = &state.context;

        let body = StatusService::status_page(
            &mut state.status_cache,
            context.store.as_ref(),
            context.device.as_ref(),
            context.gcs.as_ref(),
            context.vehicle.as_ref(),
        );

        html(StatusCode::OK, &body)
    }

    pub async fn info_json(api: web::Data<Self>) -> impl Responder {
        debug!("info_json() called");

        let mut state = api.lock();
        let state = &mut *state;
        let context = &state.context;

        StatusService::system_info(
            &mut state.status_cache,
            context.store.as_ref(),
            context.device.as_ref(),
            context.log.as_ref(),
        )
        .into_response()
    }

    pub async fn status_json(api: web::Data<Self>, args: RequestArgs) -> impl Responder {
        debug!("status_json() called");

        let reset = args.get("r").is_some_and(|r| to_int(r) != 0);
        let state = api.lock();

        StatusService::live_status(
            state.context.gcs.as_ref(),
            state.context.vehicle.as_ref(),
            reset,
        )
        .into_response()
    }

    pub async fn log_json(api: web::Data<Self>, args: RequestArgs) -> impl Responder {
        debug!("log_json() called");

        let position = args
            .get("position")
            .map_or(0, |position| to_int(position).max(0) as u64);

        StatusService::log_excerpt(api.lock().context.log.as_ref(), position).into_response()
    }

    pub async fn update_form() -> impl Responder {
        debug!("update_form() called");

        close_connection(no_cache(&mut HttpResponse::Ok()))
            .content_type(TEXT_HTML)
            .body(templates::page(&templates::UPLOAD_FORM.render(&[])))
    }

    pub async fn upload(api: web::Data<Self>, mut payload: Multipart) -> impl Responder {
        debug!("upload() called");

        'fields: while let Some(field) = payload.next().await {
            let mut field = match field {
                Ok(field) => field,
                Err(e) => {
                    error!("upload failed: {e}");
                    break;
                }
            };

            let Some(filename) = field
                .content_disposition()
                .and_then(|disposition| disposition.get_filename())
                .map(str::to_owned)
            else {
                continue;
            };

            api.upload_event(UploadEvent::Start {
                filename: &filename,
            });

            while let Some(chunk) = field.next().await {
                match chunk {
                    Ok(bytes) => api.upload_event(UploadEvent::Write(&bytes)),
                    Err(e) => {
                        error!("upload of {filename} interrupted: {e}");
                        break 'fields;
                    }
                }
            }

            api.upload_event(UploadEvent::End);
        }

        let (outcome, restart_delay) = {
            let mut state = api.lock();
            let state = &mut *state;
            (
                state.upload.finish(state.context.notifier.as_mut()),
                state.context.restart_delay,
            )
        };

        if outcome.restart {
            api.schedule_restart(restart_delay);
        }

        close_connection(no_cache(&mut HttpResponse::Ok()))
            .content_type(TEXT_PLAIN)
            .body(outcome.body())
    }

    pub async fn not_found(req: HttpRequest, args: RequestArgs) -> impl Responder {
        debug!("not_found() called: {}", req.path());

        let method = if req.method() == Method::GET {
            "GET"
        } else {
            "POST"
        };

        let echoed: String = args
            .iter()
            .map(|(name, value)| {
                format!(
                    " {}: {}\n",
                    templates::escape_html(name),
                    templates::escape_html(value)
                )
            })
            .collect();

        let mut body = templates::NOT_FOUND_ECHO.render(&[
            ("uri", req.path().into()),
            ("method", method.into()),
            ("count", args.len().to_string().into()),
            ("args", Value::html(echoed)),
        ]);
        body.push_str(&templates::ERROR_PAGE.render(&[]));

        html(StatusCode::NOT_FOUND, &body)
    }

    fn config_view(&self, view: ConfigCategory) -> HttpResponse {
        let state = self.lock();
        html(
            StatusCode::OK,
            &render_config_view(view, state.context.store.parameters()),
        )
    }

    fn upload_event(&self, event: UploadEvent<'_>) {
        let mut state = self.lock();
        let state = &mut *state;

        state.upload.handle(
            event,
            state.context.device.as_mut(),
            state.context.notifier.as_mut(),
        );
    }

    /// Restart the device once the current response went out
    fn schedule_restart(&self, delay: Duration) {
        info!("device restart in {delay:?}");

        let api = self.clone();
        actix_web::rt::spawn(async move {
            actix_web::rt::time::sleep(delay).await;
            api.lock().context.device.restart();
        });
    }
}

/// Route table of the web interface
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/login", web::route().to(Api::login))
        .route("/help", web::route().to(Api::help))
        .route(
            "/getsysconfig",
            web::route().to(Api::get_sys_config).wrap(AuthMw),
        )
        .route(
            "/getapconfig",
            web::route().to(Api::get_ap_config).wrap(AuthMw),
        )
        .route(
            "/getstaconfig",
            web::route().to(Api::get_sta_config).wrap(AuthMw),
        )
        .route(
            "/setparameters",
            web::route().to(Api::set_parameters).wrap(AuthMw),
        )
        .route("/getstatus", web::route().to(Api::get_status).wrap(AuthMw))
        .route("/info.json", web::route().to(Api::info_json).wrap(AuthMw))
        .route(
            "/status.json",
            web::route().to(Api::status_json).wrap(AuthMw),
        )
        .route("/log.json", web::route().to(Api::log_json).wrap(AuthMw))
        .route("/update", web::route().to(Api::update_form).wrap(AuthMw))
        .service(
            web::resource("/upload")
                .route(web::post().to(Api::upload).wrap(AuthMw))
                .default_service(web::route().to(Api::not_found)),
        )
        .default_service(web::route().to(Api::not_found));
}

fn render_config_view(view: ConfigCategory, parameters: &Parameters) -> String {
    match view {
        ConfigCategory::System => templates::SYSTEM_CONFIG.render(&[
            ("baud", parameters.uart_baud_rate.to_string().into()),
            ("debug", u8::from(parameters.debug_enabled).to_string().into()),
            ("mode", parameters.wifi_mode.to_string().into()),
            ("webaccount", parameters.web_account.as_str().into()),
            ("webpassword", parameters.web_password.as_str().into()),
        ]),
        ConfigCategory::AccessPoint => templates::AP_CONFIG.render(&[
            ("channel", parameters.ap_channel.to_string().into()),
            ("ssid", parameters.ap_ssid.as_str().into()),
            ("pwd", parameters.ap_password.as_str().into()),
            ("hport", parameters.ap_udp_port.to_string().into()),
        ]),
        ConfigCategory::Station => templates::STA_CONFIG.render(&[
            ("ssidsta", parameters.sta_ssid.as_str().into()),
            ("pwdsta", parameters.sta_password.as_str().into()),
            ("ipsta", parameters.sta_ip.to_string().into()),
            ("cport", parameters.sta_udp_port.to_string().into()),
            ("gatewaysta", parameters.sta_gateway.to_string().into()),
            ("subnetsta", parameters.sta_subnet.to_string().into()),
        ]),
    }
}
