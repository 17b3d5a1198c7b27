mod workdir_test;
