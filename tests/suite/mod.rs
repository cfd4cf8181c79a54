mod conversation;
mod gateway;
