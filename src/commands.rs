pub mod view;

pub use view::view;
