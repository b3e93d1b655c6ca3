pub mod nature;
