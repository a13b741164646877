mod context;
mod exchange;
mod helpers;
