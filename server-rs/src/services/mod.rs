pub mod auth_provider;
pub mod completion;
pub mod feed_token;
pub mod ics;
pub mod invitations;
pub mod mandate;
pub mod trial_sync;
pub mod whatsapp;
