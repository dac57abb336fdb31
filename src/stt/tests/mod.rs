mod helpers;
mod request_form;
