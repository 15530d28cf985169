mod indices;
mod lifecycle;
mod projects;
mod support;
