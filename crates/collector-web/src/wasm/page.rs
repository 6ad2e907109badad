use collector_core::{
    FormFieldOutcome, InboundMessage, PageError, PageHost, Subscription,
};
use collector_core::page::{MessageHandler, UnloadHandler};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use web_sys::{Document, HtmlIFrameElement, MessageEvent, Window};

use crate::page_support::{
    HIDDEN_INPUT_TYPE, MESSAGE_EVENT, SURFACE_STYLE, UNLOAD_EVENT, hidden_field_selector,
};

/// The live page, reached through `window` and `document`.
pub(super) struct WebPage;

fn window() -> Result<Window, PageError> {
    web_sys::window().ok_or_else(|| PageError::Unavailable("window".to_string()))
}

fn document() -> Result<Document, PageError> {
    window()?
        .document()
        .ok_or_else(|| PageError::Unavailable("document".to_string()))
}

fn dom_error(operation: &str) -> impl Fn(JsValue) -> PageError + '_ {
    move |error| PageError::Dom(format!("{operation}: {error:?}"))
}

/// Adds `closure` as a `window` listener for `event`; the subscription removes it.
fn listen<T: ?Sized + 'static>(event: &'static str, closure: Closure<T>) -> Option<Subscription> {
    let window = web_sys::window()?;
    window
        .add_event_listener_with_callback(event, closure.as_ref().unchecked_ref())
        .ok()?;
    Some(Subscription::new(move || {
        let _ = window.remove_event_listener_with_callback(event, closure.as_ref().unchecked_ref());
    }))
}

fn message_data(event: &MessageEvent) -> String {
    let data = event.data();
    data.as_string()
        .or_else(|| {
            js_sys::JSON::stringify(&data)
                .ok()
                .and_then(|json| json.as_string())
        })
        .unwrap_or_default()
}

impl PageHost for WebPage {
    fn mount_surface(&self, surface_id: &str, src: &str) -> Result<(), PageError> {
        let document = document()?;
        if let Some(prior) = document.get_element_by_id(surface_id) {
            prior.remove();
        }

        let iframe = document
            .create_element("iframe")
            .map_err(dom_error("create iframe"))?
            .dyn_into::<HtmlIFrameElement>()
            .map_err(|_| PageError::Dom("iframe element has unexpected type".to_string()))?;
        iframe.set_id(surface_id);
        let style = iframe.style();
        for (property, value) in SURFACE_STYLE {
            style
                .set_property(property, value)
                .map_err(dom_error("style iframe"))?;
        }
        iframe.set_src(src);

        let body = document
            .body()
            .ok_or_else(|| PageError::Unavailable("document body".to_string()))?;
        body.append_child(&iframe).map_err(dom_error("append iframe"))?;
        Ok(())
    }

    fn subscribe_messages(&self, mut handler: MessageHandler) -> Option<Subscription> {
        let closure = Closure::<dyn FnMut(MessageEvent)>::new(move |event: MessageEvent| {
            handler(InboundMessage::new(event.origin(), message_data(&event)));
        });
        listen(MESSAGE_EVENT, closure)
    }

    fn subscribe_unload(&self, mut handler: UnloadHandler) -> Option<Subscription> {
        let closure = Closure::<dyn FnMut(web_sys::Event)>::new(move |_event: web_sys::Event| {
            handler();
        });
        listen(UNLOAD_EVENT, closure)
    }

    fn set_form_field(
        &self,
        form_id: &str,
        field_name: &str,
        value: &str,
    ) -> Result<FormFieldOutcome, PageError> {
        let document = document()?;
        let form = document
            .get_element_by_id(form_id)
            .ok_or_else(|| PageError::FormNotFound(form_id.to_string()))?;

        let existing = form
            .query_selector(&hidden_field_selector(field_name))
            .map_err(dom_error("find field"))?;
        if let Some(field) = existing {
            field
                .set_attribute("value", value)
                .map_err(dom_error("set field value"))?;
            return Ok(FormFieldOutcome::Updated);
        }

        let field = document
            .create_element("input")
            .map_err(dom_error("create field"))?;
        for (name, attribute) in [("type", HIDDEN_INPUT_TYPE), ("name", field_name), ("value", value)] {
            field
                .set_attribute(name, attribute)
                .map_err(dom_error("set field attribute"))?;
        }
        form.append_child(&field).map_err(dom_error("append field"))?;
        Ok(FormFieldOutcome::Created)
    }

    fn load_script(&self, src: &str) -> Result<(), PageError> {
        let document = document()?;
        let script = document
            .create_element("script")
            .map_err(dom_error("create script"))?;
        script
            .set_attribute("src", src)
            .map_err(dom_error("set script src"))?;
        let head = document
            .head()
            .ok_or_else(|| PageError::Unavailable("document head".to_string()))?;
        head.append_child(&script).map_err(dom_error("append script"))?;
        Ok(())
    }
}
