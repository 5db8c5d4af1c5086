mod mock;

mod delivery;
mod groups;
mod gui;
mod paging;
