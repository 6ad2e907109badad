//! Browser bindings: exposes `start`, `NewSession`, `AttachToForm` and
//! `IsCompleted` to the host page and backs the SDK with the DOM, Web Storage,
//! `fetch` and `sendBeacon`.

pub mod page_support;

#[cfg(target_arch = "wasm32")]
mod wasm {
    use std::cell::RefCell;
    use std::rc::Rc;

    use collector_core::{AttachOptions, CallbackRegistry, CollectorSdk, Host, SdkSettings};
    use wasm_bindgen::JsCast;
    use wasm_bindgen::prelude::*;

    use crate::page_support::{errors_json, parse_settings, parse_start_config};

    mod console;
    mod executor;
    mod page;
    mod storage;
    mod transport;

    use console::install_logging;
    use executor::WebExecutor;
    use page::WebPage;
    use storage::{WebCookieJar, WebStorage};
    use transport::WebTransport;

    thread_local! {
        static SDK: RefCell<Option<CollectorSdk>> = const { RefCell::new(None) };
    }

    /// Starts the SDK. Returns `false`, and activates nothing, when the
    /// configuration is rejected.
    #[wasm_bindgen]
    pub fn start(config: JsValue, session_id: String) -> bool {
        console_error_panic_hook::set_once();

        let json = js_sys::JSON::stringify(&config)
            .ok()
            .and_then(|json| json.as_string())
            .unwrap_or_default();
        let mut start_config = match parse_start_config(&json) {
            Ok(start_config) => start_config,
            Err(error) => {
                web_sys::console::warn_1(&JsValue::from_str(&error.to_string()));
                return false;
            }
        };
        install_logging(start_config.debug.unwrap_or(false));
        start_config.callbacks = callbacks_from(&config);
        let settings = parse_settings(&json).unwrap_or_else(|error| {
            tracing::warn!(%error, "invalid sdk settings, using defaults");
            SdkSettings::default()
        });

        let host = Host {
            executor: Rc::new(WebExecutor),
            transport: Rc::new(WebTransport),
            cookies: Rc::new(WebCookieJar),
            local_storage: Rc::new(WebStorage::local()),
            session_storage: Rc::new(WebStorage::session()),
            page: Rc::new(WebPage),
        };
        match CollectorSdk::start_with_settings(start_config, &session_id, host, settings) {
            Ok(sdk) => {
                SDK.with(|slot| *slot.borrow_mut() = Some(sdk));
                true
            }
            Err(error) => {
                web_sys::console::warn_1(&JsValue::from_str(&error.to_string()));
                false
            }
        }
    }

    #[wasm_bindgen(js_name = NewSession)]
    pub fn new_session(session_id: String) -> bool {
        with_sdk(|sdk| sdk.new_session(&session_id).is_some()).unwrap_or(false)
    }

    #[wasm_bindgen(js_name = AttachToForm)]
    pub fn attach_to_form(form_id: String, custom_field_name: Option<String>) {
        let options = AttachOptions {
            custom_field_name,
        };
        with_sdk(|sdk| sdk.attach_to_form(&form_id, &options));
    }

    #[wasm_bindgen(js_name = IsCompleted)]
    pub fn is_completed() -> bool {
        with_sdk(CollectorSdk::is_completed).unwrap_or(false)
    }

    #[wasm_bindgen]
    pub fn errors() -> String {
        with_sdk(|sdk| errors_json(&sdk.errors())).unwrap_or_else(|| "[]".to_string())
    }

    // Callbacks re-enter the SDK, so the slot is only borrowed immutably.
    fn with_sdk<T>(f: impl FnOnce(&CollectorSdk) -> T) -> Option<T> {
        SDK.with(|slot| slot.borrow().as_ref().map(f))
    }

    /// Wraps each function under `config.callbacks` as a fire-once handler.
    fn callbacks_from(config: &JsValue) -> CallbackRegistry {
        let mut registry = CallbackRegistry::new();
        let Ok(callbacks) = js_sys::Reflect::get(config, &JsValue::from_str("callbacks")) else {
            return registry;
        };
        let Some(callbacks) = callbacks.dyn_ref::<js_sys::Object>() else {
            return registry;
        };

        for key in js_sys::Object::keys(callbacks).iter() {
            let Some(event) = key.as_string() else {
                continue;
            };
            let Ok(handler) = js_sys::Reflect::get(callbacks, &key) else {
                continue;
            };
            let Ok(function) = handler.dyn_into::<js_sys::Function>() else {
                continue;
            };
            registry.register(event, move |params| {
                let argument = serde_json::to_string(&params)
                    .ok()
                    .and_then(|json| js_sys::JSON::parse(&json).ok())
                    .unwrap_or(JsValue::NULL);
                if let Err(error) = function.call1(&JsValue::NULL, &argument) {
                    tracing::debug!(?error, "host callback threw");
                }
            });
        }
        registry
    }
}
