mod read_ahead_test;
mod shared_use_test;
mod workdir_test;
